pub mod server;
pub mod shutdown;

pub use server::ManagementServer;
pub use shutdown::ShutdownCoordinator;
