//! `#[test_timeout::tokio_timeout_test]` runs an async test on its own current-thread runtime and
//! fails it if it has not finished within the deadline (default 10 seconds, override with
//! `#[tokio_timeout_test(30)]`).
//!
//! The expansion installs a test-writer `tracing` subscriber filtered by `PIER_TEST_LOG`, so the
//! crate under test must depend on `tokio`, `tracing-subscriber` (with `env-filter`).

use proc_macro::TokenStream;
use quote::quote;
use syn::{Attribute, ItemFn, LitInt, parse_macro_input};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let timeout_secs = if attr.is_empty() {
        DEFAULT_TIMEOUT_SECS
    } else {
        let lit = parse_macro_input!(attr as LitInt);
        match lit.base10_parse::<u64>() {
            Ok(0) => {
                return syn::Error::new_spanned(lit, "timeout must be greater than zero")
                    .to_compile_error()
                    .into();
            }
            Ok(secs) => secs,
            Err(err) => return err.to_compile_error().into(),
        }
    };

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.take().is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }

    let attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_test_attribute(attr))
        .collect();

    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let _ = tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_env("PIER_TEST_LOG"))
                .try_init();
            let deadline = std::time::Duration::from_secs(#timeout_secs);
            let (done_tx, done_rx) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .expect("failed to build tokio runtime");
                    runtime.block_on(async {
                        if tokio::time::timeout(deadline, async move #block).await.is_err() {
                            panic!("test exceeded {:?}", deadline);
                        }
                    });
                }));
                let _ = done_tx.send(outcome);
            });
            // Grace period so the in-runtime timeout reports first.
            match done_rx.recv_timeout(deadline + std::time::Duration::from_secs(1)) {
                Ok(Ok(())) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test exceeded {:?} and its runtime did not yield", deadline)
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread exited without reporting")
                }
            }
        }
    })
}

/// Matches `#[test]` and `#[tokio::test]`, which the expansion replaces.
fn is_test_attribute(attr: &Attribute) -> bool {
    let segments: Vec<String> = attr
        .path()
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect();
    matches!(
        segments.iter().map(String::as_str).collect::<Vec<_>>().as_slice(),
        ["test"] | ["tokio", "test"]
    )
}
