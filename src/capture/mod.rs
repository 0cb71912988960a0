pub mod convert;
pub mod frame;
pub mod reader;
pub mod source;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use convert::{convert, Converted, PackedFormat, PackedImage};
pub use frame::{Frame, FrameMetadata, FrameRelease, PixelFormat, PlaneLayout};
pub use reader::{FrameReader, ReaderStats};
pub use source::{FrameCallback, FrameSource};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Source;
