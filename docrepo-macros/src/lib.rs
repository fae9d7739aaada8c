//! Procedural macros for the docrepo project.
//!
//! `#[derive(Record)]` generates the field descriptors the partial-update differ
//! walks, so a struct can be used as an update patch or upsert record.
//!
//! Field metadata is read from `#[record(..)]` and, for convenience, from the
//! matching `#[serde(..)]` attributes:
//!
//! - `rename = "name"` sets the storage name (for serde, the `serialize` side
//!   of `rename(serialize = .., deserialize = ..)`);
//! - `rename_all = ".."` on the struct converts every unrenamed field name;
//! - `skip` (serde also `skip_serializing`, or `rename = "-"`) excludes the field;
//! - `flatten` merges the field's own record fields into the parent.
//!
//! `#[record(default)]` marks a field whose type has no zero rule of its own,
//! such as an enum. It is left out when it equals `Default::default()`.
//!
//! Only `pub` fields are patched. A record nested without `flatten` is stored
//! whole, and is left out when its own patch would be empty.

#[allow(unused_extern_crates)]
extern crate self as docrepo_macros;

use proc_macro::TokenStream;

mod record;

#[proc_macro_derive(Record, attributes(record))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    record::derive_record(input.into()).into()
}
