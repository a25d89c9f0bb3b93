pub mod device_types;
