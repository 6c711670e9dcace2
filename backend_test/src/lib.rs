use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, ItemFn, Pat, Signature, Type};

/// Transform an asynchronous test into a synchronous one and inject dependencies.
///
/// By default every test gets a fresh [`crate::store::MemoryStore`] and a
/// rocket [`rocket::local::asynchronous::Client`] mounted on top of it.
/// Injectable parameters are `Client` and `MemoryStore`, in any order.
///
/// A test may instead take a single `MongoStore`, backed by a fresh database
/// on the replica set named by `TEST_DB_URI`. The database is dropped however
/// the test terminates. Without `TEST_DB_URI` the test is skipped.
///
/// The test body runs on a multi-threaded runtime, so spawned tasks really do
/// race against each other.
#[proc_macro_attribute]
pub fn backend_test(_args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    // Extract the injected parameters and reject invalid function signatures.
    let injection = match check_sig(item_fn.sig.clone()) {
        Ok(injection) => injection,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    let body = match injection {
        Injection::Memory(test_args) => memory_test(&new_name, &test_args),
        Injection::Mongo => mongo_test(&new_name),
    };

    // Rewrite the test function. Generated items are prefixed so they never
    // shadow helpers in the test module.
    quote! {
        #[test]
        fn #name() {
            log4rs_test_utils::test_logging::init_logging_once_for(
                ["student_election_backend"],
                None,
                None,
            );

            /// The test itself.
            #item_fn

            #body
        }
    }
    .into()
}

/// Run the test against an in-memory store and a client over it.
fn memory_test(new_name: &syn::Ident, test_args: &[TokenStream2]) -> TokenStream2 {
    quote! {
        /// Test setup.
        async fn __backend_test_setup() -> (rocket::local::asynchronous::Client, crate::store::MemoryStore) {
            let store = crate::store::MemoryStore::new();
            let shared: crate::store::SharedStore = std::sync::Arc::new(store.clone());
            let rocket_client = rocket::local::asynchronous::Client::tracked(crate::rocket_for_store(shared))
                .await
                .unwrap();
            (rocket_client, store)
        }

        let __backend_test_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
            .thread_name("backend-test-worker")
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        __backend_test_runtime.block_on(async move {
            #[allow(unused_variables)]
            let (rocket_client, store) = __backend_test_setup().await;
            #new_name(#(#test_args),*).await;
        });
    }
}

/// Run the test against a throwaway database, dropping it afterwards even if the test panics.
fn mongo_test(new_name: &syn::Ident) -> TokenStream2 {
    quote! {
        // A separate runtime for setup and cleanup, outside the `catch_unwind`.
        let __backend_test_outer = rocket::tokio::runtime::Builder::new_multi_thread()
            .thread_name("backend-test-setup-cleanup")
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let __backend_test_inner = rocket::tokio::runtime::Builder::new_multi_thread()
            .thread_name("backend-test-worker")
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        let Some(__backend_test_store) =
            __backend_test_outer.block_on(crate::store::MongoStore::for_tests())
        else {
            return;
        };

        // Use mutexes to safely transfer `!UnwindSafe` data.
        let __backend_test_store_mutex = std::sync::Mutex::new(__backend_test_store.clone());
        let __backend_test_runtime_mutex = std::sync::Mutex::new(__backend_test_inner);
        let __backend_test_result = std::panic::catch_unwind(|| {
            let store = __backend_test_store_mutex.into_inner().unwrap();
            let runtime = __backend_test_runtime_mutex.into_inner().unwrap();
            runtime.block_on(#new_name(store));
        });

        __backend_test_outer.block_on(__backend_test_store.drop_database());

        // If the test panicked, re-raise the panic.
        if let Err(cause) = __backend_test_result {
            std::panic::resume_unwind(cause);
        }
    }
}

enum Injection {
    Memory(Vec<TokenStream2>),
    Mongo,
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject unknown parameters.
fn check_sig(sig: Signature) -> Result<Injection, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut has_client = false;
    let mut has_store = false;
    let mut has_mongo = false;
    let mut args = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let Pat::Ident(_) = &*pat_type.pat {
                if let Type::Path(type_path) = &*pat_type.ty {
                    if let Some(type_ident) = type_path.path.segments.last().map(|s| &s.ident) {
                        if type_ident == "Client" {
                            if has_client {
                                return Err(syn::Error::new(
                                    input.span(),
                                    "Test cannot accept more than one `rocket::local::asynchronous::Client`",
                                ));
                            }
                            has_client = true;
                            args.push(quote! { rocket_client });
                            continue;
                        } else if type_ident == "MemoryStore" {
                            if has_store {
                                return Err(syn::Error::new(
                                    input.span(),
                                    "Test cannot accept more than one `MemoryStore`",
                                ));
                            }
                            has_store = true;
                            args.push(quote! { store });
                            continue;
                        } else if type_ident == "MongoStore" {
                            if has_mongo {
                                return Err(syn::Error::new(
                                    input.span(),
                                    "Test cannot accept more than one `MongoStore`",
                                ));
                            }
                            has_mongo = true;
                            continue;
                        }
                    }
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            "Expected one of `client_ident: Client`, `store_ident: MemoryStore` or `store_ident: MongoStore`",
        ));
    }

    if has_mongo {
        if has_client || has_store {
            return Err(syn::Error::new(
                sig.inputs.span(),
                "A test taking `MongoStore` cannot also take `Client` or `MemoryStore`",
            ));
        }
        return Ok(Injection::Mongo);
    }
    Ok(Injection::Memory(args))
}
