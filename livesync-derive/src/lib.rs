use proc_macro::TokenStream;
use proc_macro_crate::{FoundCrate, crate_name};
use quote::{format_ident, quote};
use syn::{
    Attribute, Data, DataEnum, DeriveInput, Error, Fields, GenericArgument, Ident, Index,
    PathArguments, Type, TypePath, parse_macro_input, spanned::Spanned,
};

/// Derive macro for the `FixedLayout` wire trait.
///
/// Generates a little-endian, padding-free encoder and decoder for a struct
/// whose fields are themselves `FixedLayout`, or for a fieldless enum with an
/// integer `repr`. The encoded size and a layout hash are computed at compile
/// time so both ends of a connection can detect mismatched definitions.
///
/// # Compile-Time Checks
///
/// 1. **Declared layout**: structs need `#[repr(C)]` or `#[repr(transparent)]`;
///    enums need an integer repr such as `#[repr(u8)]`.
///
/// 2. **Fixed size**: fields cannot contain heap allocations (`Vec`, `String`,
///    `Box`, ...), reference counting, references, raw pointers, or the
///    platform-width integers `usize`/`isize`.
///
/// 3. **Fieldless enums**: enum variants cannot carry data.
///
/// # Example
///
/// ```ignore
/// use livesync::FixedLayout;
///
/// #[derive(FixedLayout)]
/// #[repr(C)]
/// struct PlayerState {
///     playing: bool,
///     time: f64,
/// }
/// ```
///
/// ```ignore
/// use livesync::FixedLayout;
///
/// #[derive(FixedLayout)]
/// #[repr(C)]
/// struct Named {
///     name: String,  // Error: String has a heap allocation
/// }
/// ```
#[proc_macro_derive(FixedLayout)]
pub fn derive_fixed_layout(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match derive_fixed_layout_impl(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn get_crate_path() -> proc_macro2::TokenStream {
    match crate_name("livesync") {
        Ok(FoundCrate::Itself) => quote!(::livesync),
        Ok(FoundCrate::Name(name)) => {
            let ident = syn::Ident::new(&name, proc_macro2::Span::call_site());
            quote!(::#ident)
        }
        Err(_) => quote!(::livesync),
    }
}

fn derive_fixed_layout_impl(input: DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let repr = check_repr(&input)?;

    match &input.data {
        Data::Struct(data) => {
            let field_types = get_field_types(&data.fields);
            field_types.iter().try_for_each(check_types)?;
            Ok(expand_struct(&input, &data.fields, &field_types))
        }
        Data::Enum(data) => {
            let Repr::Int(int_ty) = repr else {
                return Err(Error::new(
                    input.span(),
                    "FixedLayout enums require an integer repr\n\
                     help: add #[repr(u8)] above this item",
                ));
            };
            expand_enum(&input, data, &int_ty)
        }
        Data::Union(u) => Err(Error::new(
            u.union_token.span,
            "FixedLayout cannot be derived for unions",
        )),
    }
}

fn expand_struct(
    input: &DeriveInput,
    fields: &Fields,
    field_types: &[Type],
) -> proc_macro2::TokenStream {
    let name = &input.ident;
    let name_str = name.to_string();
    let crate_path = get_crate_path();
    let private = quote!(#crate_path::__private);

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let mut where_predicates = where_clause
        .map(|w| w.predicates.iter().cloned().collect::<Vec<_>>())
        .unwrap_or_default();
    for ty in field_types {
        where_predicates.push(syn::parse_quote! { #ty: #private::FixedLayout });
    }

    let accessors: Vec<proc_macro2::TokenStream> = match fields {
        Fields::Named(named) => named
            .named
            .iter()
            .map(|f| {
                let ident = &f.ident;
                quote!(#ident)
            })
            .collect(),
        Fields::Unnamed(unnamed) => (0..unnamed.unnamed.len())
            .map(|i| {
                let index = Index::from(i);
                quote!(#index)
            })
            .collect(),
        Fields::Unit => Vec::new(),
    };

    let locals: Vec<Ident> = (0..field_types.len())
        .map(|i| format_ident!("__field{}", i))
        .collect();

    let writes = field_types.iter().zip(&accessors).map(|(ty, access)| {
        quote! {
            <#ty as #private::FixedLayout>::write_to(
                &self.#access,
                &mut buf[offset..offset + <#ty as #private::FixedLayout>::SIZE],
            )?;
            offset += <#ty as #private::FixedLayout>::SIZE;
        }
    });

    let reads = field_types.iter().zip(&locals).map(|(ty, local)| {
        quote! {
            let #local = <#ty as #private::FixedLayout>::read_from(
                &buf[offset..offset + <#ty as #private::FixedLayout>::SIZE],
            )?;
            offset += <#ty as #private::FixedLayout>::SIZE;
        }
    });

    let construct = match fields {
        Fields::Named(named) => {
            let idents = named.named.iter().map(|f| &f.ident);
            quote!(Self { #(#idents: #locals),* })
        }
        Fields::Unnamed(_) => quote!(Self(#(#locals),*)),
        Fields::Unit => quote!(Self),
    };

    let size = if field_types.is_empty() {
        quote!(0)
    } else {
        quote!(#(<#field_types as #private::FixedLayout>::SIZE)+*)
    };

    let hash_steps = field_types.iter().map(|ty| {
        quote! {
            hash = #private::combine_layout_hash(hash, <#ty as #private::FixedLayout>::LAYOUT_HASH);
        }
    });

    let where_tokens = if where_predicates.is_empty() {
        quote!()
    } else {
        quote!(where #(#where_predicates),*)
    };

    quote! {
        impl #impl_generics #private::FixedLayout for #name #ty_generics #where_tokens {
            const SIZE: usize = #size;
            const LAYOUT_HASH: u64 = {
                #[allow(unused_mut)]
                let mut hash = #private::fnv1a(#name_str.as_bytes());
                #(#hash_steps)*
                hash
            };

            #[allow(unused_mut, unused_variables, unused_assignments)]
            fn write_to(&self, buf: &mut [u8]) -> ::core::result::Result<(), #private::WireError> {
                #private::ensure_len(buf.len(), <Self as #private::FixedLayout>::SIZE)?;
                let mut offset = 0usize;
                #(#writes)*
                Ok(())
            }

            #[allow(unused_mut, unused_variables, unused_assignments)]
            fn read_from(buf: &[u8]) -> ::core::result::Result<Self, #private::WireError> {
                #private::ensure_len(buf.len(), <Self as #private::FixedLayout>::SIZE)?;
                let mut offset = 0usize;
                #(#reads)*
                Ok(#construct)
            }
        }
    }
}

fn expand_enum(
    input: &DeriveInput,
    data: &DataEnum,
    int_ty: &Ident,
) -> syn::Result<proc_macro2::TokenStream> {
    for variant in &data.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return Err(Error::new(
                variant.span(),
                format!(
                    "FixedLayout enum variant `{}` carries data\n\
                     help: only fieldless enums have a fixed wire layout",
                    variant.ident
                ),
            ));
        }
    }

    let name = &input.ident;
    let name_str = name.to_string();
    let crate_path = get_crate_path();
    let private = quote!(#crate_path::__private);
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let variants: Vec<&Ident> = data.variants.iter().map(|v| &v.ident).collect();
    let variant_names: Vec<String> = variants.iter().map(|v| v.to_string()).collect();

    Ok(quote! {
        impl #impl_generics #private::FixedLayout for #name #ty_generics #where_clause {
            const SIZE: usize = <#int_ty as #private::FixedLayout>::SIZE;
            const LAYOUT_HASH: u64 = {
                let mut hash = #private::fnv1a(#name_str.as_bytes());
                hash = #private::combine_layout_hash(hash, <#int_ty as #private::FixedLayout>::LAYOUT_HASH);
                #(
                    hash = #private::combine_layout_hash(hash, #private::fnv1a(#variant_names.as_bytes()));
                    hash = #private::combine_layout_hash(hash, (Self::#variants as #int_ty) as u64);
                )*
                hash
            };

            fn write_to(&self, buf: &mut [u8]) -> ::core::result::Result<(), #private::WireError> {
                let raw: #int_ty = match self {
                    #(Self::#variants => Self::#variants as #int_ty,)*
                };
                <#int_ty as #private::FixedLayout>::write_to(&raw, buf)
            }

            fn read_from(buf: &[u8]) -> ::core::result::Result<Self, #private::WireError> {
                let raw = <#int_ty as #private::FixedLayout>::read_from(buf)?;
                #(
                    if raw == Self::#variants as #int_ty {
                        return Ok(Self::#variants);
                    }
                )*
                Err(#private::WireError::InvalidDiscriminant {
                    name: #name_str,
                    value: raw as i64,
                })
            }
        }
    })
}

enum Repr {
    Struct,
    Int(Ident),
}

fn is_int_repr_ident(ident: &Ident) -> bool {
    ["u8", "u16", "u32", "u64", "i8", "i16", "i32", "i64"]
        .iter()
        .any(|name| ident == name)
}

fn find_repr(attr: &Attribute) -> syn::Result<Option<Repr>> {
    if !attr.path().is_ident("repr") {
        return Ok(None);
    }

    let mut found = None;

    attr.parse_nested_meta(|meta| {
        if let Some(ident) = meta.path.get_ident() {
            if is_int_repr_ident(ident) {
                found = Some(Repr::Int(ident.clone()));
            } else if (ident == "C" || ident == "transparent") && found.is_none() {
                found = Some(Repr::Struct);
            }
        }
        Ok(())
    })?;

    Ok(found)
}

fn check_repr(input: &DeriveInput) -> syn::Result<Repr> {
    let mut repr = None;
    for attr in &input.attrs {
        if let Some(found) = find_repr(attr)? {
            repr = Some(found);
        }
    }

    match (repr, &input.data) {
        (Some(Repr::Int(ty)), Data::Enum(_)) => Ok(Repr::Int(ty)),
        (Some(Repr::Struct), Data::Struct(_)) => Ok(Repr::Struct),
        (Some(Repr::Int(_)), Data::Struct(_)) => Err(Error::new(
            input.span(),
            "FixedLayout structs require #[repr(C)] or #[repr(transparent)]",
        )),
        (_, Data::Enum(_)) => Err(Error::new(
            input.span(),
            "FixedLayout requires #[repr(u8/u16/u32/i8/etc)] for enums\n\
             help: add #[repr(u8)] above this item",
        )),
        _ => Err(Error::new(
            input.span(),
            "FixedLayout requires #[repr(C)] or #[repr(transparent)]\n\
             help: add #[repr(C)] above this item",
        )),
    }
}

fn get_field_types(fields: &Fields) -> Vec<Type> {
    match fields {
        Fields::Named(fields) => fields.named.iter().map(|f| f.ty.clone()).collect(),
        Fields::Unnamed(fields) => fields.unnamed.iter().map(|f| f.ty.clone()).collect(),
        Fields::Unit => Vec::new(),
    }
}

fn check_types(field_ty: &Type) -> syn::Result<()> {
    fn walk(ty: &Type, field_ty: &Type) -> syn::Result<()> {
        match ty {
            Type::Path(TypePath { path, .. }) => {
                for segment in &path.segments {
                    check_forbidden_type(&segment.ident, field_ty)?;

                    if let PathArguments::AngleBracketed(args) = &segment.arguments {
                        for arg in &args.args {
                            if let GenericArgument::Type(inner_ty) = arg {
                                walk(inner_ty, field_ty)?;
                            }
                        }
                    }
                }
            }

            Type::Reference(type_ref) => {
                return Err(Error::new(
                    type_ref.span(),
                    format!(
                        "Field type `{}` contains a reference.\n\
                         A reference has no meaning on the far end of a connection.\n\
                         help: copy the data inline",
                        quote!(#field_ty),
                    ),
                ));
            }

            Type::Ptr(type_ptr) => {
                return Err(Error::new(
                    type_ptr.span(),
                    format!(
                        "Field type `{}` contains a raw pointer.\n\
                         A pointer has no meaning on the far end of a connection.\n\
                         help: copy the data inline",
                        quote!(#field_ty),
                    ),
                ));
            }

            Type::Tuple(tuple) => {
                for elem in &tuple.elems {
                    walk(elem, field_ty)?;
                }
            }

            Type::Array(array) => walk(&array.elem, field_ty)?,
            Type::Slice(slice) => {
                return Err(Error::new(
                    slice.span(),
                    format!("Field type `{}` is unsized", quote!(#field_ty)),
                ));
            }
            Type::Group(group) => walk(&group.elem, field_ty)?,
            Type::Paren(paren) => walk(&paren.elem, field_ty)?,

            _ => {}
        }

        Ok(())
    }

    walk(field_ty, field_ty)
}

fn check_forbidden_type(ident: &Ident, field_ty: &Type) -> syn::Result<()> {
    const HEAP_TYPES: &[&str] = &[
        "Vec", "Box", "String", "PathBuf", "OsString", "CString", "HashMap", "BTreeMap",
        "VecDeque",
    ];
    const RC_TYPES: &[&str] = &["Rc", "Arc", "Weak"];
    const PLATFORM_TYPES: &[&str] = &["usize", "isize"];

    let msg = if HEAP_TYPES.iter().any(|&name| ident == name) {
        format!(
            "Field type `{}` contains `{}` which has a heap allocation.\n\
             A fixed layout cannot contain variable-length data.\n\
             help: use inline data like `[u8; N]`, or send it as a Json or Text message",
            quote!(#field_ty),
            ident,
        )
    } else if RC_TYPES.iter().any(|&name| ident == name) {
        format!(
            "Field type `{}` contains `{}` which uses reference counting.\n\
             help: copy the data inline",
            quote!(#field_ty),
            ident,
        )
    } else if PLATFORM_TYPES.iter().any(|&name| ident == name) {
        format!(
            "Field type `{}` contains `{}` whose width depends on the platform.\n\
             help: use a sized integer such as u32 or u64",
            quote!(#field_ty),
            ident,
        )
    } else {
        return Ok(());
    };

    Err(Error::new(ident.span(), msg))
}
