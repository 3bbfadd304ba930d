pub mod apps;
pub mod memdump;
pub mod profiler;
