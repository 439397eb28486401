mod view;

use proc_macro::TokenStream;

/// Derive macro for the `ViewDocument` trait.
///
/// # Usage
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize, View)]
/// #[view(kind = "device")]
/// struct DeviceView {
///     #[view(id)]
///     pub id: String,
///     #[view(partition)]
///     pub device_id: String,
///     pub aggregation_sum: f64,
/// }
/// ```
///
/// - `#[view(kind = "...")]` sets the document `type` discriminator.
///   If omitted, defaults to the snake_case struct name without a trailing `_view`.
/// - `#[view(id)]` marks the document id field. Defaults to a field named `id`.
/// - `#[view(partition)]` marks the partition key field. Defaults to the id field.
#[proc_macro_derive(View, attributes(view))]
pub fn derive_view(input: TokenStream) -> TokenStream {
    view::derive_view(input)
}
