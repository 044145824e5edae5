//! Procedural macros for toolbox procedure units.
//!
//! `#[procedure]` leaves the annotated function untouched and emits, next to
//! it, a hidden `ProcedureUnit` implementation plus an `inventory`
//! submission so the unit is found by discovery at startup.

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{format_ident, quote};
use syn::parse::Parser;
use syn::spanned::Spanned;
use syn::{Expr, ExprLit, FnArg, Ident, ItemFn, Lit, LitStr, Meta, Pat, Type};

/// Marks a function as a procedure unit.
///
/// ```rust,ignore
/// /// Greets someone.
/// #[toolbox::procedure(defaults(times = 1))]
/// pub async fn greeting_action(name: String, times: u32) -> anyhow::Result<String> {
///     Ok(format!("Hello {}!", name).repeat(times as usize))
/// }
/// ```
///
/// Arguments:
/// - `description = "..."` overrides the doc comment.
/// - `defaults(param = literal, ...)` records JSON defaults for parameters.
#[proc_macro_attribute]
pub fn procedure(attr: TokenStream, item: TokenStream) -> TokenStream {
    match expand(attr.into(), item.into()) {
        Ok(tokens) => tokens.into(),
        Err(error) => error.to_compile_error().into(),
    }
}

#[derive(Default)]
struct Options {
    description: Option<LitStr>,
    defaults: Vec<(Ident, Expr)>,
}

fn parse_options(attr: TokenStream2) -> syn::Result<Options> {
    let mut options = Options::default();

    let parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("description") {
            options.description = Some(meta.value()?.parse()?);
            Ok(())
        } else if meta.path.is_ident("defaults") {
            meta.parse_nested_meta(|inner| {
                let name = inner
                    .path
                    .get_ident()
                    .cloned()
                    .ok_or_else(|| inner.error("expected a parameter name"))?;
                let value: Expr = inner.value()?.parse()?;
                check_default_literal(&value)?;
                options.defaults.push((name, value));
                Ok(())
            })
        } else {
            Err(meta.error("expected `description` or `defaults`"))
        }
    });
    parser.parse2(attr)?;

    Ok(options)
}

/// Defaults are JSON literals: strings, numbers, booleans, arrays of those.
fn check_default_literal(expr: &Expr) -> syn::Result<()> {
    match expr {
        Expr::Lit(_) => Ok(()),
        Expr::Unary(unary) if matches!(unary.op, syn::UnOp::Neg(_)) => check_default_literal(&unary.expr),
        Expr::Array(array) => array.elems.iter().try_for_each(check_default_literal),
        other => Err(syn::Error::new(other.span(), "default values must be literals")),
    }
}

fn doc_comment(attrs: &[syn::Attribute]) -> String {
    let lines: Vec<String> = attrs
        .iter()
        .filter(|a| a.path().is_ident("doc"))
        .filter_map(|a| match &a.meta {
            Meta::NameValue(nv) => match &nv.value {
                Expr::Lit(ExprLit {
                    lit: Lit::Str(s), ..
                }) => Some(s.value().trim().to_string()),
                _ => None,
            },
            _ => None,
        })
        .collect();
    lines.join("\n").trim().to_string()
}

struct Parameter {
    ident: Ident,
    ty: Type,
}

fn parameters(function: &ItemFn) -> syn::Result<Vec<Parameter>> {
    function
        .sig
        .inputs
        .iter()
        .map(|input| match input {
            FnArg::Receiver(receiver) => Err(syn::Error::new(
                receiver.span(),
                "procedure units are free functions; `self` is not allowed",
            )),
            FnArg::Typed(typed) => match typed.pat.as_ref() {
                Pat::Ident(pat) if pat.subpat.is_none() => Ok(Parameter {
                    ident: pat.ident.clone(),
                    ty: (*typed.ty).clone(),
                }),
                other => Err(syn::Error::new(
                    other.span(),
                    "procedure parameters must be plain identifiers",
                )),
            },
        })
        .collect()
}

fn expand(attr: TokenStream2, item: TokenStream2) -> syn::Result<TokenStream2> {
    let options = parse_options(attr)?;
    let function: ItemFn = syn::parse2(item)?;

    if !function.sig.generics.params.is_empty() {
        return Err(syn::Error::new(
            function.sig.generics.span(),
            "procedure units cannot be generic",
        ));
    }

    let params = parameters(&function)?;

    for (name, _) in &options.defaults {
        if !params.iter().any(|p| p.ident == *name) {
            return Err(syn::Error::new(
                name.span(),
                format!("`{}` is not a parameter of this function", name),
            ));
        }
    }

    let fn_ident = &function.sig.ident;
    let vis = &function.vis;
    let identity = fn_ident.to_string();
    let unit_ident = format_ident!("__procedure_{}", fn_ident);
    let load_ident = format_ident!("__load_{}", fn_ident);
    let args_ident = Ident::new("__toolbox_args", Span::mixed_site());

    let description = options
        .description
        .as_ref()
        .map(LitStr::value)
        .unwrap_or_else(|| doc_comment(&function.attrs));

    let specs = params.iter().map(|p| {
        let name = p.ident.to_string();
        let ty = &p.ty;
        let type_name = quote!(#ty).to_string().replace(' ', "");
        let default = match options.defaults.iter().find(|(n, _)| *n == p.ident) {
            Some((_, value)) => quote! {
                ::std::option::Option::Some(::toolbox::__private::serde_json::json!(#value))
            },
            None => quote! { ::std::option::Option::None },
        };
        quote! {
            ::toolbox::ParameterSpec::of::<#ty>(#name, #type_name, #default)
        }
    });

    let takes = params.iter().map(|p| {
        let ident = &p.ident;
        let name = ident.to_string();
        let ty = &p.ty;
        quote! { let #ident = #args_ident.take::<#ty>(#name)?; }
    });

    let call_args = params.iter().map(|p| &p.ident);
    let call = if function.sig.asyncness.is_some() {
        quote! { #fn_ident(#(#call_args),*).await }
    } else {
        quote! { #fn_ident(#(#call_args),*) }
    };

    Ok(quote! {
        #function

        #[doc(hidden)]
        #[allow(non_camel_case_types)]
        #vis struct #unit_ident;

        impl ::toolbox::ProcedureUnit for #unit_ident {
            fn identity(&self) -> &'static str {
                #identity
            }

            fn description(&self) -> &'static str {
                #description
            }

            fn signature(&self) -> ::toolbox::ProcedureSignature {
                ::toolbox::ProcedureSignature::new(::std::vec![#(#specs),*])
            }

            #[allow(unused_mut)]
            fn invoke(
                &self,
                mut #args_ident: ::toolbox::BoundArguments,
            ) -> ::std::result::Result<::toolbox::ProcedureFuture, ::toolbox::BindError> {
                #(#takes)*
                ::std::result::Result::Ok(::std::boxed::Box::pin(async move {
                    ::toolbox::IntoProcedureOutput::into_output(#call)
                }))
            }
        }

        #[doc(hidden)]
        #[allow(non_snake_case)]
        fn #load_ident() -> ::std::boxed::Box<dyn ::toolbox::ProcedureUnit> {
            ::std::boxed::Box::new(#unit_ident)
        }

        ::toolbox::__private::inventory::submit! {
            ::toolbox::ProcedureEntry::new(::std::module_path!(), #identity, #load_ident)
        }
    })
}
