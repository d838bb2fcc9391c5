// Device handling
//
// - classifier.rs: bus-type interpretation and method class selection
// - host.rs: make and model of the machine the devices sit in
// - inventory.rs: parsing and revalidation of enumeration collaborator output

pub mod classifier;
pub mod host;
pub mod inventory;

pub use classifier::{classify, classify_descriptor, BusType, Classification};
pub use host::HostInfo;
pub use inventory::{load_lsblk_file, parse_lsblk_json, validate_descriptor};
