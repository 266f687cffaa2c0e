//! Procedural macros for Courier.
//!
//! - `#[derive(Message)]` - implement `Message`, optionally renaming the
//!   payload type with `#[message(name = "...")]`
//! - `#[listener]` - turn marked methods of an impl block into registered
//!   handlers

use proc_macro::TokenStream;

mod listener;
mod message;

/// Derive macro for implementing the `Message` trait.
///
/// ```rust,ignore
/// #[derive(Serialize, Deserialize, Message)]
/// #[message(name = "CreateOrder")]
/// struct CreateOrderV2 { id: u64 }
/// ```
#[proc_macro_derive(Message, attributes(message))]
pub fn derive_message(input: TokenStream) -> TokenStream {
    message::derive_message_impl(input)
}

/// Generate a `Listener` impl from marked methods.
///
/// ```rust,ignore
/// #[listener]
/// impl OrderListener {
///     #[command]
///     async fn create(&self, cmd: CreateOrder) -> Result<OrderStatus, HandlerError> { .. }
///
///     #[handler(kind = Event)]
///     fn shipped(&self, event: OrderShipped) { .. }
/// }
/// ```
#[proc_macro_attribute]
pub fn listener(attr: TokenStream, item: TokenStream) -> TokenStream {
    listener::listener_impl(attr, item)
}
