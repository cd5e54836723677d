//! # dlg
//!
//! Reader/writer for Aurora-engine conversation files (`.dlg`).
//!
//! A conversation is stored in the Generic File Format (GFF): a header
//! followed by a struct table, a field table, a label table, a field data
//! blob, a field indices section and a list indices section. The engine
//! loader accepts only the exact layout its own toolset writes, so the writer
//! here reproduces that layout byte for byte.
//!
//! ## Format Overview
//!
//! - **Header**: 56 bytes, `"DLG "` + `"V3.2"` then six (offset, count/size)
//!   pairs. See [`gff::GffHeader`].
//! - **Structs / fields**: 12-byte records. Scalars are stored inline;
//!   strings, resrefs and localized strings live in the field data blob.
//!   See [`field_data`].
//! - **Lists**: struct index arrays in the list indices section. Every list
//!   offset is planned before any field is written. See [`layout`].
//! - **Allocation**: structs are allocated entry-first, then replies, then
//!   starts, then parameter structs. See [`alloc`].
//!
//! ## Usage
//!
//! ```no_run
//! use dlg::{Dialog, DialogNode, Pointer};
//!
//! let mut dialog = Dialog::new();
//! let mut hello = DialogNode::entry("Hello");
//! hello.add_pointer(Pointer::new(0));
//! dialog.add_entry(hello);
//! dialog.add_reply(DialogNode::reply("Hi"));
//! dialog.add_start(Pointer::new(0));
//!
//! let bytes = dlg::encode(&dialog).unwrap();
//! assert_eq!(dlg::decode(&bytes).unwrap(), dialog);
//! ```

pub mod alloc;
pub mod dlg;
pub mod error;
pub mod field_data;
pub mod gff;
pub mod layout;
pub mod types;
pub mod validate;
pub mod xml;

// Re-export main types
pub use dlg::{DlgReader, DlgWriter};
pub use error::{Error, Result};
pub use gff::{GffFile, GffHeader};
pub use layout::{ListId, ListLayout};
pub use types::{Dialog, DialogNode, LocString, NodeKind, Param, Pointer};
pub use validate::{normalize_starts, validate, Warning};

// Re-export format constants
pub use gff::{DLG_SIGNATURE, GFF_VERSION, ROOT_STRUCT_TYPE};
pub use types::{NO_STR_REF, UNSET_INDEX};

/// Decode a DLG file held in memory.
pub fn decode(data: &[u8]) -> Result<Dialog> {
    DlgReader::from_bytes(data)
}

/// Encode a dialog into a DLG file.
pub fn encode(dialog: &Dialog) -> Result<Vec<u8>> {
    DlgWriter::to_bytes(dialog)
}
