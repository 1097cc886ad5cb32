pub mod source;
pub mod file;
pub mod path;

pub mod file_scan;
pub mod license_detection;
pub mod copyright_detection;

pub mod component;
pub mod component_node;

pub mod task;
pub mod task_lock;
pub mod task_result;
