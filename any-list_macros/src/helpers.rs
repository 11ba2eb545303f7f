// SPDX-License-Identifier: MIT OR Apache-2.0

use proc_macro2::TokenStream;
use quote::quote;
use syn::{AttrStyle, Data, DeriveInput, Error, Field, Fields, Result};

/// Helper function to derive `Payload`.
///
/// The derive targets plain-data element structures (device descriptors,
/// format records, and the like). It generates the `Any` upcast needed for
/// downcasting as well as the raw byte view consumed by byte-compare search.
///
/// The byte view reinterprets the structure's memory, so the structure must
/// be `#[repr(C)]` and must not contain padding bytes; a generated const
/// assertion rejects padded layouts at compile time. Payloads that cannot
/// promise a stable byte representation implement `Payload` by hand and keep
/// the default byte view of `None`.
pub(crate) fn derive_payload_struct(input: DeriveInput) -> Result<TokenStream> {
    let s = match &input.data {
        Data::Struct(s) => s,
        _ => {
            return Err(Error::new_spanned(
                &input,
                "Payload can only be derived for structs",
            ))
        }
    };

    let fields: Vec<&Field> = match &s.fields {
        Fields::Named(f) => f.named.iter().collect(),
        Fields::Unnamed(f) => f.unnamed.iter().collect(),
        Fields::Unit => {
            return Err(Error::new_spanned(
                &input,
                "Payload can only be derived for structs with fields",
            ))
        }
    };

    if !has_repr_c(&input) {
        return Err(Error::new_spanned(
            &input,
            "Payload can only be derived for structs with #[repr(C)]",
        ));
    }

    if !input.generics.params.is_empty() {
        return Err(Error::new_spanned(
            &input,
            "Payload cannot be derived for generic structs",
        ));
    }

    let ident = &input.ident;

    // The byte view covers the whole structure, so every byte must belong to
    // a field. Padded layouts fail this assertion at compile time.
    let field_sizes = fields.iter().map(|field| {
        let ty = &field.ty;
        quote! { ::core::mem::size_of::<#ty>() }
    });

    Ok(quote! {
        const _: () = ::core::assert!(
            ::core::mem::size_of::<#ident>() == 0usize #(+ #field_sizes)*,
            "Payload cannot be derived for structs with padding bytes",
        );

        impl ::any_list::Payload for #ident {
            fn as_any(&self) -> &dyn ::core::any::Any {
                self
            }

            fn as_bytes(&self) -> ::core::option::Option<&[u8]> {
                let ptr = self as *const Self as *const u8;
                let len = ::core::mem::size_of::<Self>();
                ::core::option::Option::Some(unsafe {
                    ::core::slice::from_raw_parts(ptr, len)
                })
            }
        }
    })
}

/// Returns whether the given input has a `#[repr(C)]` attribute.
///
/// This also works when multiple `repr` attributes are used, or a single `repr` attribute has multiple entries.
fn has_repr_c(input: &DeriveInput) -> bool {
    input.attrs.iter().any(|attr| {
        if !matches!(attr.style, AttrStyle::Outer) || !attr.path().is_ident("repr") {
            return false;
        }

        let mut found = false;
        let _ = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("C") {
                found = true;
            }
            Ok(())
        });

        found
    })
}
