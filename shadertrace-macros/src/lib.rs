//! Proc-macro for auto-deriving `shadertrace::proxy::Aggregate`.
#![recursion_limit = "256"]

extern crate proc_macro;
extern crate proc_macro2;
extern crate quote;
extern crate syn;

use proc_macro2::{Span, TokenStream};
use quote::{quote, ToTokens, TokenStreamExt};
use syn::spanned::Spanned;

struct CrateName;
const CRATE: CrateName = CrateName;

impl ToTokens for CrateName {
    fn to_tokens(&self, tokens: &mut TokenStream) {
        tokens.append(syn::Ident::new("shadertrace", Span::call_site()))
    }
}

#[proc_macro_derive(ShaderStruct)]
pub fn shader_struct_derive(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    derive(input).into()
}

fn derive(input: proc_macro::TokenStream) -> TokenStream {
    let derive_input: syn::DeriveInput = match syn::parse(input) {
        Ok(input) => input,
        Err(e) => return e.into_compile_error(),
    };

    let fields = match derive_input.data {
        syn::Data::Struct(ref struct_data) => match &struct_data.fields {
            syn::Fields::Named(named) => &named.named,
            _ => {
                return syn::Error::new(derive_input.span(), "`ShaderStruct` requires named fields")
                    .into_compile_error();
            }
        },
        _ => {
            return syn::Error::new(derive_input.span(), "`ShaderStruct` can only be derived on structs")
                .into_compile_error();
        }
    };

    let struct_name = &derive_input.ident;
    let (impl_generics, ty_generics, where_clause) = derive_input.generics.split_for_impl();

    let field_defs = fields.iter().map(|f| {
        let ident = f.ident.as_ref().expect("named field");
        let ty = &f.ty;
        let name_str = ident.to_string();
        quote! {
            #CRATE::ast::Field {
                name: #name_str.into(),
                ty: <#ty as #CRATE::proxy::Proxy>::shader_type(ctx),
            }
        }
    });

    let field_inits = fields.iter().map(|f| {
        let ident = f.ident.as_ref().expect("named field");
        let ty = &f.ty;
        quote! {
            #ident: <#ty as #CRATE::proxy::Proxy>::construct_default()
        }
    });

    quote! {
        impl #impl_generics #CRATE::proxy::Aggregate for #struct_name #ty_generics #where_clause {
            fn shader_fields(ctx: &mut #CRATE::context::ParserContext) -> ::std::vec::Vec<#CRATE::ast::Field> {
                vec![#(#field_defs),*]
            }

            fn from_parent(ctx: &mut #CRATE::context::ParserContext, parent: #CRATE::context::Id<#CRATE::ast::ValueData>) -> Self {
                let fields = Self::shader_fields(ctx);
                ctx.push_construction_scope(#CRATE::context::ConstructionScope::AggregateMember {
                    parent,
                    fields,
                    next_index: 0,
                });
                let result = #struct_name {
                    #(#field_inits,)*
                };
                ctx.pop_construction_scope();
                result
            }
        }
    }
}
