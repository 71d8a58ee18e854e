use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, spanned::Spanned, Ident, ItemFn, LitStr};

const USAGE: &str = "rxcore_macro::test only accepts: #[rxcore_macro::test], \
                     #[rxcore_macro::test(local)] or #[rxcore_macro::test(shared)]";

/// Marks a test function.
///
/// Sync functions become plain `#[test]`s. Async functions run on a tokio
/// runtime: `local` selects the current-thread flavor (the default) and
/// `shared` the multi-thread flavor, which is what cross-thread drain and
/// scheduler tests need.
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
  let input = parse_macro_input!(item as ItemFn);
  let is_async = input.sig.asyncness.is_some();
  let raw_args = proc_macro2::TokenStream::from(attr);

  let flavor = if raw_args.is_empty() {
    None
  } else {
    if !is_async {
      return TokenStream::from(
        syn::Error::new(
          raw_args.span(),
          "rxcore_macro::test flavor args are only supported for async tests",
        )
        .to_compile_error(),
      );
    }

    let name = if let Ok(ident) = syn::parse2::<Ident>(raw_args.clone()) {
      Some((ident.to_string(), ident.span()))
    } else if let Ok(lit) = syn::parse2::<LitStr>(raw_args.clone()) {
      Some((lit.value(), lit.span()))
    } else {
      None
    };

    match name {
      Some((name, _)) if name == "local" => Some(quote!(flavor = "current_thread")),
      Some((name, _)) if name == "shared" => Some(quote!(flavor = "multi_thread", worker_threads = 4)),
      Some((_, span)) => {
        return TokenStream::from(syn::Error::new(span, USAGE).to_compile_error());
      }
      None => {
        return TokenStream::from(syn::Error::new(raw_args.span(), USAGE).to_compile_error());
      }
    }
  };

  let attr = match (is_async, flavor) {
    (false, _) => quote!(#[test]),
    (true, Some(flavor)) => quote!(#[tokio::test(#flavor)]),
    (true, None) => quote!(#[tokio::test]),
  };

  TokenStream::from(quote! {
    #attr
    #input
  })
}
