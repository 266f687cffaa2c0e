//! `#[derive(Message)]`.

use proc_macro::TokenStream;
use quote::quote;
use syn::{DeriveInput, LitStr, parse_macro_input};

/// Implementation of the `Message` derive.
pub fn derive_message_impl(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let type_name = match message_name(&input) {
        Ok(type_name) => type_name,
        Err(err) => return err.to_compile_error().into(),
    };

    let type_name_fn = type_name.map(|lit| {
        quote! {
            fn type_name() -> &'static str {
                #lit
            }
        }
    });

    let expanded = quote! {
        impl #impl_generics ::courier::Message for #name #ty_generics #where_clause {
            #type_name_fn
        }
    };

    TokenStream::from(expanded)
}

/// Reads `#[message(name = "...")]`.
fn message_name(input: &DeriveInput) -> syn::Result<Option<LitStr>> {
    let mut name = None;
    for attr in &input.attrs {
        if !attr.path().is_ident("message") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let lit: LitStr = meta.value()?.parse()?;
                if lit.value().trim().is_empty() {
                    return Err(meta.error("message name must not be empty"));
                }
                name = Some(lit);
                Ok(())
            } else {
                Err(meta.error("unknown message attribute, expected `name`"))
            }
        })?;
    }
    Ok(name)
}
