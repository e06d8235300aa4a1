pub mod fs_storage;
pub mod work_dir;
