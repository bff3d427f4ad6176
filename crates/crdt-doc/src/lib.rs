//! # crdt-doc
//!
//! The replicated document used by `crdt-mesh`.
//!
//! [`ReplicatedDoc`] is the capability the sync engine consumes: create an
//! empty document, apply a local edit, merge remote change records, export
//! the full history, and export the last local change. [`Document`] is the
//! implementation shipped with the workspace, a JSON map whose fields are
//! last-writer-wins registers ordered by Lamport stamps.
//!
//! ## Quick Start
//!
//! ```
//! use crdt_doc::{Document, ReplicatedDoc};
//!
//! let a = Document::init("a").change(|d| d.put("count", 1)).unwrap();
//! let b = Document::init("b").change(|d| d.put("title", "notes")).unwrap();
//!
//! // Merge in either order
//! let ab = a.apply_changes(b.all_changes()).unwrap();
//! let ba = b.apply_changes(a.all_changes()).unwrap();
//! assert_eq!(ab, ba);
//! ```

#![warn(missing_docs)]

mod change;
mod document;
mod replicated;

pub mod clock;

pub use change::{Change, ChangeId, Op};
pub use document::{Document, Draft, Patch, SESSION_KEY};
pub use replicated::ReplicatedDoc;
