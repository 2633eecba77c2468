pub mod audio;
pub mod device;
pub mod stream;

pub use stream::CpalDevices;
