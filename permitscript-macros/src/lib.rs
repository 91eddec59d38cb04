//! Procedural macros for registering permitscript host functions.
//!
//! Provides the `#[host_fn]` attribute macro. A host function is a plain Rust
//! function the embedder registers as a global callable. The macro extracts
//! its rustdoc comments into help text and emits a companion `register_*`
//! function that installs the callable (and its schema) into a
//! `HostRegistry`.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, Meta};

fn extract_doc_comments(attrs: &[Attribute]) -> String {
    attrs
        .iter()
        .filter_map(|attr| {
            if attr.path().is_ident("doc") {
                if let Meta::NameValue(nv) = &attr.meta {
                    if let syn::Expr::Lit(syn::ExprLit {
                        lit: syn::Lit::Str(lit_str),
                        ..
                    }) = &nv.value
                    {
                        return Some(lit_str.value());
                    }
                }
            }
            None
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Parse `name = "..."`, `contextless = true`, `receiver = "..."` from the
/// attribute argument list.
fn parse_host_fn_args(attr_stream: TokenStream) -> (String, bool, Option<String>) {
    let attr_str = attr_stream.to_string();

    let mut name = String::new();
    let mut contextless = false;
    let mut receiver = None;

    if let Some(start) = attr_str.find("name = \"") {
        let rest = &attr_str[start + 8..];
        if let Some(end) = rest.find('"') {
            name = rest[..end].to_string();
        }
    }

    if attr_str.contains("contextless") {
        contextless = true;
    }

    if let Some(start) = attr_str.find("receiver = \"") {
        let rest = &attr_str[start + 12..];
        if let Some(end) = rest.find('"') {
            receiver = Some(rest[..end].to_string());
        }
    }

    (name, contextless, receiver)
}

/// Attribute macro for defining a permitscript host function.
///
/// ```ignore
/// #[host_fn(name = "fs.read")]
/// /// Reads a file's contents as a UTF-8 string.
/// pub fn fs_read(call: &HostCall) -> Result<Value, Error> {
///     // ...
/// }
/// ```
///
/// Every host function shares one signature (`call.context` carries the
/// caller's capability environment). Functions whose effect isn't gated by
/// a fine-grained permission already checked inside the function body
/// (filesystem/HTTP/command calls check themselves against `call.context`)
/// must be declared `contextless = true`, which requires the runtime to
/// hold a matching `Contextless-call` permission before every invocation.
#[proc_macro_attribute]
pub fn host_fn(attr: TokenStream, item: TokenStream) -> TokenStream {
    let func = parse_macro_input!(item as ItemFn);

    let (lisp_name, contextless, receiver) = parse_host_fn_args(attr);
    let fn_name = func.sig.ident.clone();
    let fn_ident_str = fn_name.to_string();

    let name_to_use = if !lisp_name.is_empty() {
        lisp_name
    } else {
        fn_ident_str.clone()
    };

    let description = extract_doc_comments(&func.attrs);
    let register_fn_name = quote::format_ident!("register_{}", fn_name);
    let receiver_tokens = match receiver {
        Some(r) => quote! { Some(#r.to_string()) },
        None => quote! { None },
    };

    let expanded = quote! {
        #func

        /// Registers #fn_name into a `HostRegistry` under its schema.
        #[allow(dead_code)]
        pub fn #register_fn_name(registry: &mut crate::host::HostRegistry) {
            registry.register(crate::host::HostEntry {
                name: #name_to_use.to_string(),
                contextless: #contextless,
                receiver: #receiver_tokens,
                description: #description.to_string(),
                func: #fn_name,
            });
        }
    };

    TokenStream::from(expanded)
}
