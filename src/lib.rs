pub mod appearance;
pub mod calibration;
pub mod combinations;
pub mod data_loader;
pub mod detection;
pub mod init_pose;
pub mod matching;
pub mod model;
pub mod optimization;
pub mod store;
pub mod tracker;
pub mod types;
pub mod visualization;
