//! `#[listener]` and its method markers.
//!
//! Methods inside the impl block marked with `#[command]`, `#[query]`,
//! `#[notification]`, `#[event]` or `#[handler(kind = ..)]` become handlers.
//! The markers are removed and a `Listener` impl is generated that registers
//! each marked method with the registry builder.
//!
//! Arity is not checked here: a marked method with zero or several payload
//! parameters registers an arity-only candidate, and the registry build
//! reports it at startup.

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{format_ident, quote};
use syn::{
    Attribute, FnArg, Ident, ImplItem, ImplItemFn, ItemImpl, LitStr, Receiver, Type,
    parse_macro_input,
    spanned::Spanned,
};

const MARKERS: [&str; 5] = ["command", "query", "notification", "event", "handler"];

/// Implementation of the `#[listener]` macro.
pub fn listener_impl(attr: TokenStream, item: TokenStream) -> TokenStream {
    let name_override = if attr.is_empty() {
        None
    } else {
        Some(parse_macro_input!(attr as ListenerArgs).name)
    };
    let mut input = parse_macro_input!(item as ItemImpl);

    if input.trait_.is_some() {
        return syn::Error::new_spanned(
            &input.self_ty,
            "#[listener] must be placed on an inherent impl block",
        )
        .to_compile_error()
        .into();
    }

    let listener_name = name_override.unwrap_or_else(|| type_label(&input.self_ty));

    let mut registrations = Vec::new();
    for item in &mut input.items {
        let ImplItem::Fn(method) = item else {
            continue;
        };
        match take_marker(method) {
            Ok(Some(kind)) => registrations.push(registration(method, &kind, &listener_name)),
            Ok(None) => {}
            Err(err) => return err.to_compile_error().into(),
        }
    }

    let registrations = match registrations.into_iter().collect::<syn::Result<Vec<_>>>() {
        Ok(registrations) => registrations,
        Err(err) => return err.to_compile_error().into(),
    };

    let self_ty = &input.self_ty;
    let (impl_generics, _, where_clause) = input.generics.split_for_impl();

    let expanded = quote! {
        #input

        impl #impl_generics ::courier::Listener for #self_ty #where_clause {
            #[allow(unused_variables)]
            fn register(
                self: ::std::sync::Arc<Self>,
                builder: &mut ::courier::RegistryBuilder,
            ) {
                #(#registrations)*
            }
        }
    };

    TokenStream::from(expanded)
}

/// Arguments for `#[listener(name = "...")]`.
struct ListenerArgs {
    name: String,
}

impl syn::parse::Parse for ListenerArgs {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        let ident: Ident = input.parse()?;
        if ident != "name" {
            return Err(syn::Error::new(
                ident.span(),
                format!("unknown attribute: {}", ident),
            ));
        }
        input.parse::<syn::Token![=]>()?;
        let lit: LitStr = input.parse()?;
        Ok(ListenerArgs { name: lit.value() })
    }
}

/// The last path segment of the impl's type, e.g. `OrderListener`.
fn type_label(ty: &Type) -> String {
    match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .map(|segment| segment.ident.to_string())
            .unwrap_or_else(|| quote!(#ty).to_string()),
        other => quote!(#other).to_string().replace(' ', ""),
    }
}

/// Removes the handler marker from `method` and returns its kind variant.
fn take_marker(method: &mut ImplItemFn) -> syn::Result<Option<Ident>> {
    let mut found: Option<(Ident, Span)> = None;
    let mut kept: Vec<Attribute> = Vec::with_capacity(method.attrs.len());

    for attr in method.attrs.drain(..) {
        let Some(marker) = MARKERS.iter().find(|m| attr.path().is_ident(**m)) else {
            kept.push(attr);
            continue;
        };
        if let Some((_, first)) = &found {
            let mut err = syn::Error::new(attr.span(), "a handler can carry only one kind marker");
            err.combine(syn::Error::new(*first, "first marker here"));
            return Err(err);
        }
        let kind = match *marker {
            "handler" => handler_kind(&attr)?,
            simple => {
                attr.meta.require_path_only()?;
                kind_variant(simple, attr.span())?
            }
        };
        found = Some((kind, attr.span()));
    }

    method.attrs = kept;
    Ok(found.map(|(kind, _)| kind))
}

/// Reads `#[handler(kind = Command)]` or `#[handler(kind = "COMMAND")]`.
fn handler_kind(attr: &Attribute) -> syn::Result<Ident> {
    let mut kind = None;
    attr.parse_nested_meta(|meta| {
        if !meta.path.is_ident("kind") {
            return Err(meta.error("unknown handler attribute, expected `kind`"));
        }
        let value = meta.value()?;
        let (text, span) = if value.peek(LitStr) {
            let lit: LitStr = value.parse()?;
            (lit.value(), lit.span())
        } else {
            let ident: Ident = value.parse()?;
            (ident.to_string(), ident.span())
        };
        kind = Some(kind_variant(&text, span)?);
        Ok(())
    })?;
    kind.ok_or_else(|| syn::Error::new(attr.span(), "missing `kind = ..`"))
}

fn kind_variant(text: &str, span: Span) -> syn::Result<Ident> {
    let variant = match text.to_ascii_lowercase().as_str() {
        "command" => "Command",
        "query" => "Query",
        "notification" => "Notification",
        "event" => "Event",
        _ => {
            return Err(syn::Error::new(
                span,
                format!("unknown message kind `{text}`, expected Command, Query, Notification or Event"),
            ));
        }
    };
    Ok(Ident::new(variant, span))
}

/// Handlers share the listener through an `Arc`, so only `&self` and
/// `self: Arc<Self>` can be called from the generated closure.
fn check_receiver(receiver: &Receiver) -> syn::Result<()> {
    let message = match (&receiver.reference, &receiver.mutability) {
        (Some(_), Some(_)) => "handlers cannot take `&mut self`, use `&self` with interior mutability",
        (Some(_), None) => return Ok(()),
        (None, _) if receiver.colon_token.is_some() && is_arc_self(&receiver.ty) => return Ok(()),
        (None, _) => "handlers take `&self` or `self: Arc<Self>`, not `self` by value",
    };
    Err(syn::Error::new(receiver.span(), message))
}

fn is_arc_self(ty: &Type) -> bool {
    let Type::Path(path) = ty else {
        return false;
    };
    path.path
        .segments
        .last()
        .is_some_and(|segment| segment.ident == "Arc")
}

/// Generates the builder call for one marked method.
fn registration(method: &ImplItemFn, kind: &Ident, listener: &str) -> syn::Result<TokenStream2> {
    let name = &method.sig.ident;
    let method_name = name.to_string();
    let kind_path = quote! { ::courier::MessageKind::#kind };

    let receiver = method.sig.receiver();
    if let Some(receiver) = receiver {
        check_receiver(receiver)?;
    }
    let params: Vec<_> = method
        .sig
        .inputs
        .iter()
        .filter_map(|arg| match arg {
            FnArg::Typed(pat_type) => Some(pat_type),
            FnArg::Receiver(_) => None,
        })
        .collect();

    if params.len() != 1 {
        let count = params.len();
        return Ok(quote! {
            builder.candidate(::courier::HandlerCandidate::with_arity(
                #kind_path,
                #listener,
                #method_name,
                #count,
            ));
        });
    }

    let payload_ty = &params[0].ty;
    if let Type::Reference(reference) = &**payload_ty {
        return Err(syn::Error::new_spanned(
            reference,
            "handler payloads are taken by value",
        ));
    }

    let payload = format_ident!("__payload");
    let this = format_ident!("__this");
    let await_call = method.sig.asyncness.map(|_| quote! { .await });

    let call = match receiver {
        Some(receiver) if receiver.reference.is_some() => quote! { #this.#name(#payload) },
        Some(_) => quote! { ::std::sync::Arc::clone(&#this).#name(#payload) },
        None => quote! { Self::#name(#payload) },
    };

    Ok(quote! {
        {
            let #this = ::std::sync::Arc::clone(&self);
            builder.handle::<#payload_ty, _>(
                #kind_path,
                #listener,
                #method_name,
                move |#payload: #payload_ty| {
                    let #this = ::std::sync::Arc::clone(&#this);
                    async move {
                        let _ = &#this;
                        #call #await_call
                    }
                },
            );
        }
    })
}
