use proc_macro2::{Ident, TokenStream, TokenTree};
use quote::{ToTokens, quote};
use syn::{
    Attribute, Data, DeriveInput, Error, Field, Fields, LitStr, Token, Type, Visibility, WhereClause,
    WherePredicate, ext::IdentExt, meta::ParseNestedMeta, parse_quote, punctuated::Punctuated,
};

const SKIPPED: &str = "-";

///
/// RenameRule
///
/// Field-name case conversions accepted by `rename_all`, applied the way serde
/// applies them to snake_case field names.
///

#[derive(Clone, Copy, Debug, PartialEq)]
enum RenameRule {
    Lower,
    Upper,
    Pascal,
    Camel,
    Snake,
    ScreamingSnake,
    Kebab,
    ScreamingKebab,
}

impl RenameRule {
    fn parse(rule: &LitStr) -> syn::Result<Self> {
        Ok(match rule.value().as_str() {
            "lowercase" => RenameRule::Lower,
            "UPPERCASE" => RenameRule::Upper,
            "PascalCase" => RenameRule::Pascal,
            "camelCase" => RenameRule::Camel,
            "snake_case" => RenameRule::Snake,
            "SCREAMING_SNAKE_CASE" => RenameRule::ScreamingSnake,
            "kebab-case" => RenameRule::Kebab,
            "SCREAMING-KEBAB-CASE" => RenameRule::ScreamingKebab,
            other => return Err(Error::new_spanned(rule, format!("unknown rename rule `{other}`"))),
        })
    }

    fn apply(self, field: &str) -> String {
        match self {
            RenameRule::Lower | RenameRule::Snake => field.to_string(),
            RenameRule::Upper | RenameRule::ScreamingSnake => field.to_ascii_uppercase(),
            RenameRule::Pascal => {
                let mut pascal = String::with_capacity(field.len());
                let mut capitalize = true;
                for ch in field.chars() {
                    if ch == '_' {
                        capitalize = true;
                    } else if capitalize {
                        pascal.push(ch.to_ascii_uppercase());
                        capitalize = false;
                    } else {
                        pascal.push(ch);
                    }
                }
                pascal
            }
            RenameRule::Camel => {
                let pascal = RenameRule::Pascal.apply(field);
                let mut chars = pascal.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
                    None => pascal,
                }
            }
            RenameRule::Kebab => field.replace('_', "-"),
            RenameRule::ScreamingKebab => field.to_ascii_uppercase().replace('_', "-"),
        }
    }
}

// consumes a serde key this derive has no use for
fn ignore(meta: &ParseNestedMeta<'_>) -> syn::Result<()> {
    if meta.input.peek(Token![=]) {
        let _: syn::Expr = meta.value()?.parse()?;
    } else if !meta.input.is_empty() && !meta.input.peek(Token![,]) {
        let _: TokenTree = meta.input.parse()?;
    }

    Ok(())
}

// `key = ".."` or `key(serialize = "..", deserialize = "..")`; only the
// serialize side names the stored field
fn serialize_value(meta: &ParseNestedMeta<'_>) -> syn::Result<Option<LitStr>> {
    if meta.input.peek(Token![=]) {
        return Ok(Some(meta.value()?.parse()?));
    }

    let mut serialize = None;
    meta.parse_nested_meta(|inner| {
        let value: LitStr = inner.value()?.parse()?;
        if inner.path.is_ident("serialize") {
            serialize = Some(value);
        } else if !inner.path.is_ident("deserialize") {
            return Err(inner.error("expected `serialize` or `deserialize`"));
        }

        Ok(())
    })?;

    Ok(serialize)
}

///
/// ContainerAttrs
///

#[derive(Default)]
struct ContainerAttrs {
    rename_all: Option<RenameRule>,
}

impl ContainerAttrs {
    fn from_input(input: &DeriveInput) -> syn::Result<Self> {
        let mut attrs = ContainerAttrs::default();

        for attr in &input.attrs {
            if attr.path().is_ident("record") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("rename_all") {
                        attrs.rename_all = Some(RenameRule::parse(&meta.value()?.parse()?)?);
                        Ok(())
                    } else {
                        Err(meta.error("unsupported record attribute, expected `rename_all`"))
                    }
                })?;
            } else if attr.path().is_ident("serde") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("rename_all") {
                        if let Some(rule) = serialize_value(&meta)? {
                            attrs.rename_all = Some(RenameRule::parse(&rule)?);
                        }
                        Ok(())
                    } else {
                        ignore(&meta)
                    }
                })?;
            }
        }

        Ok(attrs)
    }
}

///
/// FieldAttrs
///

#[derive(Default)]
struct FieldAttrs {
    rename: Option<String>,
    skip: bool,
    flatten: bool,
    default: bool,
}

impl FieldAttrs {
    fn from_field(field: &Field) -> syn::Result<Self> {
        let mut attrs = FieldAttrs::default();

        for attr in &field.attrs {
            if attr.path().is_ident("record") {
                attrs.parse_record(attr)?;
            } else if attr.path().is_ident("serde") {
                attrs.parse_serde(attr)?;
            }
        }

        Ok(attrs)
    }

    fn parse_record(&mut self, attr: &Attribute) -> syn::Result<()> {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") {
                let name: LitStr = meta.value()?.parse()?;
                self.rename = Some(name.value());
            } else if meta.path.is_ident("skip") {
                self.skip = true;
            } else if meta.path.is_ident("flatten") {
                self.flatten = true;
            } else if meta.path.is_ident("default") {
                self.default = true;
            } else {
                return Err(meta.error(
                    "unsupported record attribute, expected `rename`, `skip`, `flatten` or `default`",
                ));
            }

            Ok(())
        })
    }

    fn parse_serde(&mut self, attr: &Attribute) -> syn::Result<()> {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") {
                if let Some(name) = serialize_value(&meta)? {
                    self.rename = Some(name.value());
                }
            } else if meta.path.is_ident("skip") || meta.path.is_ident("skip_serializing") {
                self.skip = true;
            } else if meta.path.is_ident("flatten") {
                self.flatten = true;
            } else {
                ignore(&meta)?;
            }

            Ok(())
        })
    }
}

// derive_record
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input: DeriveInput = match syn::parse2(input) {
        Ok(input) => input,
        Err(err) => return err.to_compile_error(),
    };

    match expand(&input) {
        Ok(tokens) => tokens,
        Err(err) => err.to_compile_error(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream> {
    let ident = &input.ident;
    let (impl_generics, ty_generics, _) = input.generics.split_for_impl();

    let Data::Struct(data) = &input.data else {
        return Err(Error::new_spanned(
            &input.ident,
            "Record can only be derived for structs with named fields",
        ));
    };
    let Fields::Named(named) = &data.fields else {
        return Err(Error::new_spanned(
            &data.fields,
            "Record can only be derived for structs with named fields",
        ));
    };

    let container = ContainerAttrs::from_input(input)?;
    let params = input
        .generics
        .type_params()
        .map(|param| param.ident.clone())
        .collect::<Vec<_>>();

    let mut descriptors = Vec::with_capacity(named.named.len());
    let mut bounds = Vec::new();
    for field in &named.named {
        let (descriptor, bound) = field_descriptor(field, container.rename_all, &params)?;
        descriptors.push(descriptor);
        bounds.extend(bound);
    }

    let mut record_where = input
        .generics
        .where_clause
        .clone()
        .unwrap_or_else(|| WhereClause {
            where_token: Default::default(),
            predicates: Punctuated::new(),
        });
    record_where.predicates.extend(bounds);

    let mut field_where = record_where.clone();
    field_where
        .predicates
        .push(parse_quote!(Self: ::docrepo::__private::Serialize));

    Ok(quote! {
        impl #impl_generics ::docrepo::patch::Record for #ident #ty_generics #record_where {
            fn describe(
                &self,
            ) -> ::docrepo::error::DocumentStoreResult<::std::vec::Vec<::docrepo::patch::FieldDescriptor>> {
                #[allow(unused_imports)]
                use ::docrepo::patch::{FieldDescriptor, FieldValue, PatchField};

                ::std::result::Result::Ok(::std::vec![#(#descriptors),*])
            }
        }

        impl #impl_generics ::docrepo::patch::PatchSource for #ident #ty_generics #record_where {
            fn shape(&self) -> ::docrepo::patch::Shape<'_> {
                ::docrepo::patch::Shape::Record(self)
            }
        }

        impl #impl_generics ::docrepo::patch::PatchField for #ident #ty_generics #field_where {
            fn patch_value(&self) -> ::docrepo::error::DocumentStoreResult<::docrepo::patch::FieldValue> {
                let zero = ::docrepo::patch::partial_update(self)?.is_empty();

                ::docrepo::patch::FieldValue::plain(self, zero)
            }
        }
    })
}

fn mentions_param(ty: &Type, params: &[Ident]) -> bool {
    fn scan(tokens: TokenStream, params: &[Ident]) -> bool {
        tokens.into_iter().any(|token| match token {
            TokenTree::Ident(ident) => params.contains(&ident),
            TokenTree::Group(group) => scan(group.stream(), params),
            _ => false,
        })
    }

    !params.is_empty() && scan(ty.to_token_stream(), params)
}

fn field_descriptor(
    field: &Field,
    rename_all: Option<RenameRule>,
    params: &[Ident],
) -> syn::Result<(TokenStream, Option<WherePredicate>)> {
    let Some(field_ident) = field.ident.as_ref() else {
        return Err(Error::new_spanned(field, "expected a named field"));
    };
    let attrs = FieldAttrs::from_field(field)?;
    let ty = &field.ty;

    let name = field_ident.unraw().to_string();
    let visible = matches!(field.vis, Visibility::Public(_));
    let skipped = attrs.skip || attrs.rename.as_deref() == Some(SKIPPED);
    let storage = match (&attrs.rename, rename_all) {
        (Some(rename), _) => rename.clone(),
        (None, Some(rule)) => rule.apply(&name),
        (None, None) => name.clone(),
    };

    // excluded fields keep a descriptor but are never inspected
    let (value, bound) = if !visible || skipped {
        (quote! { FieldValue::Absent }, None)
    } else if attrs.flatten {
        (
            quote! { FieldValue::embedded(&self.#field_ident)? },
            Some(parse_quote!(#ty: ::docrepo::patch::PatchSource)),
        )
    } else if attrs.default {
        (
            quote! { FieldValue::defaulted(&self.#field_ident)? },
            Some(parse_quote!(
                #ty: ::docrepo::__private::Serialize + ::std::default::Default + ::std::cmp::PartialEq
            )),
        )
    } else {
        (
            quote! { PatchField::patch_value(&self.#field_ident)? },
            Some(parse_quote!(#ty: ::docrepo::patch::PatchField)),
        )
    };
    let bound = bound.filter(|_| mentions_param(ty, params));

    let mut descriptor = quote! { FieldDescriptor::new(#name, #value) };

    if skipped {
        descriptor = quote! { #descriptor.renamed(#SKIPPED) };
    } else if storage != name {
        descriptor = quote! { #descriptor.renamed(#storage) };
    }
    if !visible {
        descriptor = quote! { #descriptor.hidden() };
    }
    if attrs.flatten {
        descriptor = quote! { #descriptor.inline() };
    }

    Ok((descriptor, bound))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_rules_match_serde_field_conversions() {
        let cases = [
            (RenameRule::Lower, "first_name"),
            (RenameRule::Upper, "FIRST_NAME"),
            (RenameRule::Pascal, "FirstName"),
            (RenameRule::Camel, "firstName"),
            (RenameRule::Snake, "first_name"),
            (RenameRule::ScreamingSnake, "FIRST_NAME"),
            (RenameRule::Kebab, "first-name"),
            (RenameRule::ScreamingKebab, "FIRST-NAME"),
        ];

        for (rule, expected) in cases {
            assert_eq!(rule.apply("first_name"), expected, "{rule:?}");
        }
        assert_eq!(RenameRule::Camel.apply("id"), "id");
    }

    #[test]
    fn unknown_rename_rules_are_rejected() {
        let rule: LitStr = parse_quote!("Title Case");

        assert!(RenameRule::parse(&rule).is_err());
    }

    fn expand_str(input: TokenStream) -> String {
        expand(&syn::parse2(input).unwrap()).unwrap().to_string()
    }

    #[test]
    fn serde_metadata_drives_storage_names() {
        let expanded = expand_str(quote! {
            #[serde(rename_all = "camelCase")]
            struct Member {
                pub first_name: String,
                #[serde(rename(serialize = "fullName", deserialize = "full_name"))]
                pub display_name: String,
                #[serde(skip_serializing)]
                pub password: String,
            }
        });

        assert!(expanded.contains("\"firstName\""));
        assert!(expanded.contains("\"fullName\""));
        assert!(!expanded.contains("\"displayName\""));
        assert!(expanded.contains("\"-\""));
    }

    #[test]
    fn only_generic_fields_get_bounds() {
        let fields: syn::FieldsNamed = parse_quote!({
            pub kind: String,
            pub payload: T,
            pub items: Vec<T>,
            secret: T,
        });
        let params = vec![Ident::new("T", proc_macro2::Span::call_site())];

        let bounded = fields
            .named
            .iter()
            .map(|field| field_descriptor(field, None, &params).unwrap().1.is_some())
            .collect::<Vec<_>>();

        assert_eq!(bounded, vec![false, true, true, false]);
    }
}
