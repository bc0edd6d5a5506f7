pub use credentials::{CredentialProvider, InstalledFlowCredentials, RefreshTokenCredentials};
pub use drive::{ChangeFeed, GoogleDrive};
pub use drive_id::DriveId;
pub use executor::{RetryClass, TransferExecutor};
pub use reqwest_transport::ReqwestTransport;
pub use resources::{AboutResource, Change, ChangeKind, FileResource};
pub use transfer::{
    HttpTransport, Method, TransferBody, TransferDestination, TransferRequest, TransferResponse,
};

mod credentials;
mod drive;
mod drive_id;
mod executor;
pub mod helpers;
mod reqwest_transport;
mod resources;
mod transfer;
