//! HTTP/1.x wire model.
//!
//! # Data Flow
//! ```text
//! socket bytes
//!     → line.rs (LF-terminated lines, CR ignored)
//!     → message.rs (start line) + headers.rs (header block)
//!     → uri.rs (request target decomposition)
//!     → chunked.rs (body frames) + chunk_ext.rs (frame annotations)
//! ```
//!
//! # Design Decisions
//! - Parsing is tolerant where browsers are sloppy (blank lines before a
//!   request, malformed header lines) and strict where framing is at stake
//! - Nothing here knows about proxying; the relay logic lives in `proxy`

pub mod chunk_ext;
pub mod chunked;
pub mod headers;
pub mod line;
pub mod message;
pub mod uri;

pub use chunk_ext::ChunkExtensions;
pub use chunked::{ChunkedReader, ChunkedWriter};
pub use headers::Headers;
pub use message::{read_message, write_message, Message, Request, Response, Version};
pub use uri::Uri;
