use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident};

pub fn derive_event_payload(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(expanded) => TokenStream::from(expanded),
        Err(err) => TokenStream::from(err.to_compile_error()),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let type_name = name.to_string();
    let id_field = entity_id_field(input)?;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics topic_consumer::Payload for #name #ty_generics #where_clause {
            fn shape() -> topic_consumer::PayloadShape {
                topic_consumer::PayloadShape::Typed(topic_consumer::EventType::of::<Self>())
            }
        }

        impl #impl_generics topic_consumer::EventPayload for #name #ty_generics #where_clause {
            const TYPE_NAME: &'static str = #type_name;

            fn entity_id(&self) -> &str {
                &self.#id_field
            }
        }
    })
}

fn entity_id_field(input: &DeriveInput) -> syn::Result<Ident> {
    // #[event(entity_id = field)] on the struct
    for attr in &input.attrs {
        if !attr.path().is_ident("event") {
            continue;
        }

        let mut named = None;
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("entity_id") {
                named = Some(meta.value()?.parse::<Ident>()?);
                Ok(())
            } else {
                Err(meta.error("expected `entity_id = <field>`"))
            }
        })?;

        if let Some(field) = named {
            return Ok(field);
        }
    }

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input.ident,
                    "EventPayload derive needs a struct with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "EventPayload derive only supports structs",
            ))
        }
    };

    // #[event(entity_id)] on a field
    for field in fields {
        for attr in &field.attrs {
            if !attr.path().is_ident("event") {
                continue;
            }
            let mut marked = false;
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("entity_id") {
                    marked = true;
                    Ok(())
                } else {
                    Err(meta.error("expected `entity_id`"))
                }
            })?;
            if let (true, Some(ident)) = (marked, &field.ident) {
                return Ok(ident.clone());
            }
        }
    }

    fields
        .iter()
        .filter_map(|field| field.ident.as_ref())
        .find(|ident| *ident == "entity_id")
        .cloned()
        .ok_or_else(|| {
            syn::Error::new_spanned(
                &input.ident,
                "EventPayload derive: no `entity_id` field; name one with #[event(entity_id = <field>)]",
            )
        })
}
