pub mod connection;
pub mod model;
pub mod provisioner;

pub use connection::{EsConnection, EsOptions};
pub use provisioner::{EsProvisioner, EsService, ProvisionResult, RemoveOptions, SetupOptions};
