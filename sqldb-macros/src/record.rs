use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Visibility};

use crate::attrs::parse_field_attrs;

pub(crate) fn expand(input: &DeriveInput) -> syn::Result<TokenStream> {
    let name = &input.ident;
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Record cannot be derived for generic structs",
        ));
    }
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "Record can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "Record can only be derived for structs",
            ));
        }
    };

    let mut descriptors = Vec::with_capacity(fields.len());
    let mut ref_arms = Vec::new();
    let mut mut_arms = Vec::new();

    for (index, field) in fields.iter().enumerate() {
        let ident = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new_spanned(field, "expected a named field"))?;
        let ty = &field.ty;
        let attrs = parse_field_attrs(field)?;
        let field_name = ident.to_string();
        let field_name = field_name.trim_start_matches("r#");
        let exported = matches!(field.vis, Visibility::Public(_));
        let tag_tokens = attrs.tags.iter().map(|(k, v)| quote!((#k, #v)));

        let embedded = if attrs.flatten {
            quote! {
                ::core::option::Option::Some(::sqldb::mapping::EmbeddedRecord {
                    type_name: ::core::any::type_name::<#ty>,
                    fields: <#ty as ::sqldb::mapping::Record>::struct_fields,
                })
            }
        } else {
            quote!(::core::option::Option::None)
        };

        descriptors.push(quote! {
            ::sqldb::mapping::StructField {
                name: #field_name,
                tags: &[#(#tag_tokens),*],
                exported: #exported,
                embedded: #embedded,
            }
        });

        if attrs.ignored() || !(exported || attrs.flatten) {
            continue;
        }
        if attrs.flatten {
            ref_arms.push(quote! {
                #index => ::core::option::Option::Some(
                    ::sqldb::mapping::FieldRef::Embedded(&self.#ident)
                ),
            });
            mut_arms.push(quote! {
                #index => ::core::option::Option::Some(
                    ::sqldb::mapping::FieldMut::Embedded(&mut self.#ident)
                ),
            });
        } else {
            ref_arms.push(quote! {
                #index => ::core::option::Option::Some(
                    ::sqldb::mapping::FieldRef::Value(&self.#ident)
                ),
            });
            mut_arms.push(quote! {
                #index => ::core::option::Option::Some(
                    ::sqldb::mapping::FieldMut::Value(&mut self.#ident)
                ),
            });
        }
    }

    Ok(quote! {
        impl ::sqldb::mapping::RecordFields for #name {
            fn field_ref(&self, index: usize) -> ::core::option::Option<::sqldb::mapping::FieldRef<'_>> {
                match index {
                    #(#ref_arms)*
                    _ => ::core::option::Option::None,
                }
            }

            fn field_mut(&mut self, index: usize) -> ::core::option::Option<::sqldb::mapping::FieldMut<'_>> {
                match index {
                    #(#mut_arms)*
                    _ => ::core::option::Option::None,
                }
            }
        }

        impl ::sqldb::mapping::Record for #name {
            fn struct_fields() -> &'static [::sqldb::mapping::StructField] {
                static FIELDS: &[::sqldb::mapping::StructField] = &[#(#descriptors),*];
                FIELDS
            }
        }
    })
}
