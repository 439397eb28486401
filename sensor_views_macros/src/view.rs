use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, LitStr};

pub fn derive_view(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let kind = extract_kind(&input);

    let id_field = match marked_field(&input, "id").or_else(|| field_named(&input, "id")) {
        Some(field) => field,
        None => {
            return syn::Error::new_spanned(
                name,
                "View derive: no field marked with #[view(id)] and no field named `id`",
            )
            .to_compile_error()
            .into();
        }
    };
    let partition_field = marked_field(&input, "partition").unwrap_or_else(|| id_field.clone());

    let expanded = quote! {
        impl ::sensor_views::ViewDocument for #name {
            const KIND: &'static str = #kind;

            fn id(&self) -> &str {
                &self.#id_field
            }

            fn partition_key(&self) -> &str {
                &self.#partition_field
            }
        }
    };

    TokenStream::from(expanded)
}

fn extract_kind(input: &DeriveInput) -> String {
    for attr in &input.attrs {
        if !attr.path().is_ident("view") {
            continue;
        }

        let mut kind = None;
        let _ = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("kind") {
                let value: LitStr = meta.value()?.parse()?;
                kind = Some(value.value());
            }
            Ok(())
        });

        if let Some(k) = kind {
            return k;
        }
    }

    // Default: snake_case struct name, minus a trailing "_view"
    let name = to_snake_case(&input.ident.to_string());
    match name.strip_suffix("_view") {
        Some(stripped) if !stripped.is_empty() => stripped.to_string(),
        _ => name,
    }
}

fn marked_field(input: &DeriveInput, marker: &str) -> Option<Ident> {
    let Data::Struct(data_struct) = &input.data else {
        return None;
    };
    let Fields::Named(fields) = &data_struct.fields else {
        return None;
    };

    for field in &fields.named {
        for attr in &field.attrs {
            if !attr.path().is_ident("view") {
                continue;
            }
            let mut found = false;
            let _ = attr.parse_nested_meta(|meta| {
                if meta.path.is_ident(marker) {
                    found = true;
                }
                Ok(())
            });
            if found {
                return field.ident.clone();
            }
        }
    }

    None
}

fn field_named(input: &DeriveInput, wanted: &str) -> Option<Ident> {
    let Data::Struct(data_struct) = &input.data else {
        return None;
    };
    let Fields::Named(fields) = &data_struct.fields else {
        return None;
    };

    fields
        .named
        .iter()
        .filter_map(|field| field.ident.as_ref())
        .find(|ident| *ident == wanted)
        .cloned()
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, ch) in s.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(ch.to_lowercase());
        } else {
            result.push(ch);
        }
    }
    result
}
