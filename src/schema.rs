//! Diesel table definitions for the two stores.
//!
//! `element_meta_info` lives in the metadata database, `element_data` in
//! the content database; each store client connects only to its own file.

diesel::table! {
    element_meta_info (element_id) {
        element_id -> Text,
        page_index -> Nullable<Integer>,
        element_type -> Text,
        page_position -> Nullable<Text>,
        text_level -> Nullable<Integer>,
        bucket_name -> Nullable<Text>,
        image_file_path -> Nullable<Text>,
        image_file_name -> Nullable<Text>,
        image_file_type -> Nullable<Text>,
        image_file_suffix -> Nullable<Text>,
        knowledge_base_id -> Nullable<Text>,
        knowledge_base_name -> Nullable<Text>,
        parent_knowledge_base_id -> Nullable<Text>,
        parent_knowledge_base_name -> Nullable<Text>,
        knowledge_type -> Nullable<Text>,
        status -> Integer,
        creator -> Text,
        create_time -> Text,
        updater -> Text,
        update_time -> Text,
        deleted -> Integer,
    }
}

diesel::table! {
    element_data (id) {
        id -> Text,
        element_type -> Text,
        content -> Text,
        status -> Integer,
        creator -> Text,
        create_time -> Text,
        updater -> Text,
        update_time -> Text,
        deleted -> Integer,
    }
}
