mod attrs;
mod record;

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

/// Derive `sqldb::Record` for a struct with named fields.
///
/// Field attributes:
/// - `#[db = "column,primarykey=table,readonly,default"]` sets the `db` tag
/// - `#[db(flatten)]` embeds another `Record` anonymously
/// - `#[tag(key = "value", ...)]` attaches tags under other keys
#[proc_macro_derive(Record, attributes(db, tag))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    record::expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
