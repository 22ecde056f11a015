//! Proc macros for kubetest
//!
//! Provides the `#[kubetest::test]` attribute for cluster-backed tests.

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{Expr, ExprLit, FnArg, ItemFn, Lit, LitStr, Meta, MetaNameValue, Pat, PatType, Token};

/// Attribute for Kubernetes integration tests
///
/// A parameter named `kube` receives a [`Harness`] bound to a fresh
/// namespace. The namespace is deleted when the test passes and kept, with
/// a diagnostics report on stderr, when it fails.
///
/// ```ignore
/// use kubetest::Harness;
///
/// #[kubetest::test]
/// async fn echo(kube: Harness) {
///     let mut deployment = kube.load_deployment("tests/configs/deployment.yaml").unwrap();
///     kube.create(&mut deployment).await.unwrap();
/// }
/// ```
///
/// # Applying manifests
///
/// `apply_manifests` creates every object in the listed files before the
/// body runs and waits until all of them are ready. `dir` is relative to the
/// crate root. `timeout_secs` overrides the config's registered timeout.
///
/// ```ignore
/// #[kubetest::test(apply_manifests(dir = "tests/configs", files = ["nginx-ingress.yaml"]))]
/// async fn nginx(kube: Harness) {
///     assert!(kube.get_services().await.unwrap().contains("echo-service"));
/// }
/// ```
///
/// The body may also return `Result<(), E>` with `E: Debug`; an `Err` fails
/// the test.
///
/// `KUBETEST_KEEP_ALL` keeps the namespace even when the test passes.
///
/// [`Harness`]: https://docs.rs/kubetest/latest/kubetest/struct.Harness.html
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input_fn = syn::parse_macro_input!(item as ItemFn);
    let options = match parse_options(attr.into()) {
        Ok(options) => options,
        Err(e) => return e.to_compile_error().into(),
    };
    test_impl(&input_fn, &options).into()
}

/// Parsed attribute arguments
#[derive(Debug, Default)]
struct TestOptions {
    manifests: Option<ManifestOptions>,
}

#[derive(Debug)]
struct ManifestOptions {
    dir: LitStr,
    files: Vec<LitStr>,
    timeout_secs: Option<u64>,
}

fn parse_options(attr: proc_macro2::TokenStream) -> syn::Result<TestOptions> {
    let mut options = TestOptions::default();
    let metas = Punctuated::<Meta, Token![,]>::parse_terminated.parse2(attr)?;

    for meta in metas {
        match meta {
            Meta::List(list) if list.path.is_ident("apply_manifests") => {
                if options.manifests.is_some() {
                    return Err(syn::Error::new_spanned(list, "apply_manifests given twice"));
                }
                let args = list
                    .parse_args_with(Punctuated::<MetaNameValue, Token![,]>::parse_terminated)?;
                options.manifests = Some(parse_manifest_args(args, &list.path)?);
            }
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "expected `apply_manifests(dir = \"...\", files = [...])`",
                ))
            }
        }
    }

    Ok(options)
}

fn parse_manifest_args(
    args: Punctuated<MetaNameValue, Token![,]>,
    at: &syn::Path,
) -> syn::Result<ManifestOptions> {
    let mut dir = None;
    let mut files = None;
    let mut timeout_secs = None;

    for arg in args {
        let key = arg
            .path
            .get_ident()
            .map(ToString::to_string)
            .unwrap_or_default();
        match key.as_str() {
            "dir" => dir = Some(string_literal(&arg.value)?),
            "files" => {
                let Expr::Array(array) = &arg.value else {
                    return Err(syn::Error::new_spanned(
                        &arg.value,
                        "files must be an array of string literals",
                    ));
                };
                files = Some(
                    array
                        .elems
                        .iter()
                        .map(string_literal)
                        .collect::<syn::Result<Vec<_>>>()?,
                );
            }
            "timeout_secs" => match &arg.value {
                Expr::Lit(ExprLit {
                    lit: Lit::Int(int), ..
                }) => timeout_secs = Some(int.base10_parse()?),
                other => {
                    return Err(syn::Error::new_spanned(other, "timeout_secs must be an integer"))
                }
            },
            _ => {
                return Err(syn::Error::new_spanned(
                    &arg.path,
                    "unknown apply_manifests argument, expected dir, files or timeout_secs",
                ))
            }
        }
    }

    let files = files.ok_or_else(|| syn::Error::new_spanned(at, "apply_manifests needs `files`"))?;
    if files.is_empty() {
        return Err(syn::Error::new_spanned(at, "apply_manifests needs at least one file"));
    }

    Ok(ManifestOptions {
        dir: dir.unwrap_or_else(|| LitStr::new(".", Span::call_site())),
        files,
        timeout_secs,
    })
}

fn string_literal(expr: &Expr) -> syn::Result<LitStr> {
    match expr {
        Expr::Lit(ExprLit {
            lit: Lit::Str(s), ..
        }) => Ok(s.clone()),
        other => Err(syn::Error::new_spanned(other, "expected a string literal")),
    }
}

/// The `kube` parameter, if present
fn harness_param(input_fn: &ItemFn) -> Option<&PatType> {
    input_fn.sig.inputs.iter().find_map(|arg| match arg {
        FnArg::Typed(pat_type) => match pat_type.pat.as_ref() {
            Pat::Ident(ident) if ident.ident == "kube" => Some(pat_type),
            _ => None,
        },
        FnArg::Receiver(_) => None,
    })
}

/// Expansion, on `proc_macro2` types so it can be unit tested
fn test_impl(input_fn: &ItemFn, options: &TestOptions) -> proc_macro2::TokenStream {
    let fn_name = &input_fn.sig.ident;
    let fn_block = &input_fn.block;
    let fn_vis = &input_fn.vis;
    let fn_attrs = &input_fn.attrs;
    let fn_output = &input_fn.sig.output;

    let Some(param) = harness_param(input_fn) else {
        if let Some(arg) = input_fn.sig.inputs.first() {
            return syn::Error::new_spanned(
                arg,
                "#[kubetest::test] only injects a parameter named `kube: Harness`",
            )
            .to_compile_error();
        }
        if options.manifests.is_some() {
            return syn::Error::new_spanned(
                &input_fn.sig,
                "apply_manifests needs a `kube: Harness` parameter",
            )
            .to_compile_error();
        }
        return quote! {
            #(#fn_attrs)*
            #[::kubetest::__private::tokio::test(crate = "::kubetest::__private::tokio")]
            #fn_vis async fn #fn_name() #fn_output #fn_block
        };
    };

    let binding = &param.pat;

    let setup = options.manifests.as_ref().map(|manifests| {
        let dir = &manifests.dir;
        let files = &manifests.files;
        let timeout = match manifests.timeout_secs {
            Some(secs) => quote! { ::std::time::Duration::from_secs(#secs) },
            None => quote! { kube.config().registered_timeout },
        };
        quote! {
            let manifest_dir = ::std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(#dir);
            if let Err(e) = kube.apply_manifests(&manifest_dir, &[#(#files),*]).await {
                panic!("[kubetest] failed to apply manifests from {}: {}", manifest_dir.display(), e);
            }
            if let Err(e) = kube.wait_for_registered(#timeout).await {
                panic!("[kubetest] registered resources did not become ready: {}", e);
            }
        }
    });

    let body = if let syn::ReturnType::Type(_, ret_ty) = fn_output {
        // pins the async block's output so `?` in the body has a target type
        quote! {
            fn typed_body<F: ::std::future::Future<Output = #ret_ty>>(body: F) -> F {
                body
            }
            let outcome = typed_body(async #fn_block).await;
            if let Err(e) = outcome {
                panic!("[kubetest] test returned an error: {:?}", e);
            }
        }
    } else {
        quote! {
            (async #fn_block).await;
        }
    };

    quote! {
        #(#fn_attrs)*
        #[::kubetest::__private::tokio::test(crate = "::kubetest::__private::tokio")]
        #fn_vis async fn #fn_name() {
            use ::kubetest::__private::futures::FutureExt;

            ::kubetest::telemetry::init_logging();
            let #binding = ::kubetest::Harness::new()
                .await
                .unwrap_or_else(|e| panic!("[kubetest] failed to create harness: {}", e));

            let result = ::std::panic::AssertUnwindSafe(async {
                #setup
                #body
            })
            .catch_unwind()
            .await;

            match result {
                Ok(()) => {
                    if kube.config().keep_namespace {
                        eprintln!("[kubetest] KUBETEST_KEEP_ALL set, keeping namespace: {}", kube.namespace);
                    } else if let Err(e) = kube.cleanup().await {
                        eprintln!("[kubetest] warning: cleanup failed: {}", e);
                    }
                }
                Err(panic) => {
                    let mut diag = kube.collect_diagnostics().await;
                    diag.kept = true;
                    eprintln!("{}", diag);
                    ::std::panic::resume_unwind(panic);
                }
            }
        }
    }
}
