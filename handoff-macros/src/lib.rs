use proc_macro::TokenStream;
use quote::quote;
use syn::{
    parse_macro_input, Data, DeriveInput, ImplItem, ImplItemFn, ItemImpl, Stmt,
    Variant, Visibility,
};

/// Turns a plain enum into a Handoff error type.
///
/// The attribute:
/// 1. Adds `#[derive(Debug, thiserror::Error, uniffi::Error)]` and `#[uniffi(flat_error)]`
/// 2. Appends a `Generic { message: String }` variant unless the enum declares one
/// 3. Implements `From<anyhow::Error>`, flattening the context chain into the message
/// 4. Adds `from_anyhow_result` / `from_anyhow_result_with_prefix` helpers
///
/// # Usage
///
/// ```rust,ignore
/// #[handoff_error]
/// pub enum StoreError {
///     #[error("key not found")]
///     KeyNotFound,
///     #[error("quota exceeded for {key}")]
///     QuotaExceeded { key: String },
/// }
/// ```
#[proc_macro_attribute]
pub fn handoff_error(_args: TokenStream, input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let Data::Enum(data_enum) = &input.data else {
        return syn::Error::new_spanned(&input, "handoff_error can only be applied to enums")
            .to_compile_error()
            .into();
    };

    let enum_name = &input.ident;
    let visibility = &input.vis;
    let generics = &input.generics;

    // Derives and uniffi attributes are re-emitted below.
    let attrs: Vec<_> = input
        .attrs
        .iter()
        .filter(|attr| !attr.path().is_ident("derive") && !attr.path().is_ident("uniffi"))
        .collect();

    let mut variants = data_enum.variants.clone();
    if !variants.iter().any(|variant| variant.ident == "Generic") {
        let generic_variant: Variant = syn::parse_quote! {
            /// Any other failure, carrying the flattened `anyhow` chain.
            #[error("Generic error: {message}")]
            Generic {
                /// The flattened error chain.
                message: String
            }
        };
        variants.push(generic_variant);
    }

    quote! {
        #[derive(Debug, thiserror::Error, uniffi::Error)]
        #[uniffi(flat_error)]
        #(#attrs)*
        #visibility enum #enum_name #generics {
            #variants
        }

        impl #generics #enum_name #generics {
            fn flatten_anyhow_chain(err: &anyhow::Error) -> String {
                let mut message = err.to_string();
                let chain: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
                if !chain.is_empty() {
                    message.push_str(" (caused by: ");
                    message.push_str(&chain.join(" -> "));
                    message.push(')');
                }
                message
            }

            /// Converts an `anyhow::Result` into a result of this error type.
            #[allow(dead_code)]
            pub fn from_anyhow_result<T>(result: anyhow::Result<T>) -> Result<T, Self> {
                result.map_err(Self::from)
            }

            /// Converts an `anyhow::Result` into a result of this error type, prefixing the message.
            #[allow(dead_code)]
            pub fn from_anyhow_result_with_prefix<T>(
                result: anyhow::Result<T>,
                prefix: &str,
            ) -> Result<T, Self> {
                result.map_err(|err| Self::Generic {
                    message: format!("{}: {}", prefix, Self::flatten_anyhow_chain(&err)),
                })
            }
        }

        impl #generics From<anyhow::Error> for #enum_name #generics {
            fn from(err: anyhow::Error) -> Self {
                Self::Generic {
                    message: Self::flatten_anyhow_chain(&err),
                }
            }
        }
    }
    .into()
}

/// Wraps `uniffi::export` and opens a logging context in every public method.
///
/// The attribute:
/// 1. Forwards its arguments to `#[uniffi::export]`
/// 2. Inserts `let _handoff_logger_ctx = crate::primitives::logger::LogContext::new("TypeName");`
///    as the first statement of every `pub fn`
/// 3. Adds `async_runtime = "tokio"` when a public method is `async`
///
/// # Usage
///
/// ```rust,ignore
/// #[handoff_export]
/// impl AccountMatcher {
///     pub fn suggest_match(&self, target: Identity) -> Option<MatchCandidate> {
///         info!("prefixed with [Handoff][AccountMatcher]");
///         None
///     }
/// }
/// ```
#[proc_macro_attribute]
pub fn handoff_export(args: TokenStream, input: TokenStream) -> TokenStream {
    let input_impl = parse_macro_input!(input as ItemImpl);

    let type_name = match &*input_impl.self_ty {
        syn::Type::Path(type_path) => type_path
            .path
            .segments
            .last()
            .map_or_else(|| "Unknown".to_string(), |segment| segment.ident.to_string()),
        _ => "Unknown".to_string(),
    };

    let has_async_functions = has_async_functions_in_impl(&input_impl.items);

    let new_items = input_impl
        .items
        .iter()
        .map(|item| match item {
            ImplItem::Fn(method) if matches!(method.vis, Visibility::Public(_)) => {
                let mut method = method.clone();
                inject_logging_context(&mut method, &type_name);
                ImplItem::Fn(method)
            }
            other => other.clone(),
        })
        .collect();

    let new_impl = ItemImpl {
        items: new_items,
        ..input_impl
    };

    let mut args = proc_macro2::TokenStream::from(args);
    if has_async_functions {
        args = if args.is_empty() {
            quote! { async_runtime = "tokio" }
        } else {
            quote! { #args, async_runtime = "tokio" }
        };
    }

    quote! {
        #[uniffi::export(#args)]
        #new_impl
    }
    .into()
}

/// True when at least one public method of the impl block is `async`.
fn has_async_functions_in_impl(impl_items: &[ImplItem]) -> bool {
    impl_items.iter().any(|item| {
        matches!(item, ImplItem::Fn(method)
            if matches!(method.vis, Visibility::Public(_)) && method.sig.asyncness.is_some())
    })
}

fn inject_logging_context(method: &mut ImplItemFn, type_name: &str) {
    let context_stmt: Stmt = syn::parse_quote! {
        let _handoff_logger_ctx = crate::primitives::logger::LogContext::new(#type_name);
    };
    method.block.stmts.insert(0, context_stmt);
}
