use darling::Error;
use darling::ast::NestedMeta;
use quote::quote;
use syn::{Data, DeriveInput, Fields, ItemStruct, parse_macro_input};

use proc_macro::TokenStream;

/// Serializes every field in declaration order, big-endian.
#[proc_macro_derive(ToBytes)]
pub fn derive_to_bytes(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = input.ident;

    let fields: Vec<syn::Member> = match input.data {
        Data::Struct(ref s) => match s.fields {
            Fields::Named(ref nf) => nf
                .named
                .iter()
                .filter_map(|f| f.ident.clone())
                .map(syn::Member::from)
                .collect(),
            Fields::Unnamed(ref uf) => uf
                .unnamed
                .iter()
                .enumerate()
                .map(|(i, _)| syn::Index::from(i).into())
                .collect(),
            Fields::Unit => Vec::new(),
        },
        _ => {
            return TokenStream::from(
                syn::Error::new_spanned(&name, "ToBytes can only be derived for structs")
                    .to_compile_error(),
            );
        }
    };

    let expanded = quote! {
        impl crate::byteorder::WriteBytesBe for #name {
            fn write_be(&self, dst: &mut Vec<u8>) {
                #( crate::byteorder::WriteBytesBe::write_be(&self.#fields, dst); )*
            }
        }
    };

    TokenStream::from(expanded)
}

/// Attaches an ISOBMFF box type to a struct, e.g. `#[mp4_box_type(b"mvhd")]`.
///
/// The struct must implement `WriteBytesBe`, its serialization is the box payload.
#[proc_macro_attribute]
pub fn mp4_box_type(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = match NestedMeta::parse_meta_list(attr.into()) {
        Ok(v) => v,
        Err(e) => {
            return TokenStream::from(Error::from(e).write_errors());
        }
    };

    let Some(first) = args.first() else {
        return TokenStream::from(
            Error::custom("mp4_box_type expects a byte string, e.g. b\"mvhd\"").write_errors(),
        );
    };

    let type_bytes = match first {
        NestedMeta::Lit(syn::Lit::ByteStr(bs)) => bs.value(),
        _ => {
            return TokenStream::from(
                syn::Error::new_spanned(first, "mp4_box_type expects a byte string, e.g. b\"mvhd\"")
                    .to_compile_error(),
            );
        }
    };

    if type_bytes.len() != 4 {
        return TokenStream::from(
            syn::Error::new_spanned(first, "mp4_box_type expects 4 bytes").to_compile_error(),
        );
    }
    let type_bytes_tokens = {
        let b = type_bytes;
        quote! {[#(#b),*]}
    };

    let input = parse_macro_input!(item as ItemStruct);
    let name = &input.ident;

    let expanded = quote! {
        #input

        impl Mp4Box for #name {
            fn box_type(&self) -> &[u8; 4] {
                const BYTES: [u8; 4] = #type_bytes_tokens;
                &BYTES
            }

            fn box_data(&self) -> Vec<u8> {
                let mut vec = Vec::new();
                self.write_be(&mut vec);
                vec
            }
        }
    };
    TokenStream::from(expanded)
}
