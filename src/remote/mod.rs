pub mod tcp;
pub mod traits;

pub use tcp::{TcpRemoteService, TcpServiceConfig, TcpSession};
pub use traits::RemoteService;
