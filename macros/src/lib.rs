use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, spanned::Spanned, Ident, ItemFn, LitStr};

const USAGE: &str = "rxflow_macro::test only accepts: #[rxflow_macro::test], \
                     #[rxflow_macro::test(current_thread)], #[rxflow_macro::test(multi_thread)], \
                     or string equivalents";

/// Marks a test function.
///
/// Sync functions become plain `#[test]`s. Async functions run on a tokio
/// runtime, `current_thread` unless `multi_thread` is passed.
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
  let input = parse_macro_input!(item as ItemFn);
  let is_async = input.sig.asyncness.is_some();

  let raw_args = proc_macro2::TokenStream::from(attr);
  let flavor = if raw_args.is_empty() {
    None
  } else if !is_async {
    return syn::Error::new(
      raw_args.span(),
      "rxflow_macro::test flavor args are only supported for async tests",
    )
    .to_compile_error()
    .into();
  } else {
    let (name, span) = if let Ok(ident) = syn::parse2::<Ident>(raw_args.clone()) {
      (ident.to_string(), ident.span())
    } else if let Ok(lit) = syn::parse2::<LitStr>(raw_args.clone()) {
      (lit.value(), lit.span())
    } else {
      return syn::Error::new(raw_args.span(), USAGE).to_compile_error().into();
    };
    match name.as_str() {
      "current_thread" => Some(quote!(flavor = "current_thread")),
      "multi_thread" => Some(quote!(flavor = "multi_thread", worker_threads = 2)),
      _ => return syn::Error::new(span, USAGE).to_compile_error().into(),
    }
  };

  let expanded = if is_async {
    quote! {
      #[tokio::test(#flavor)]
      #input
    }
  } else {
    quote! {
      #[test]
      #input
    }
  };

  TokenStream::from(expanded)
}
