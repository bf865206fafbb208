use syn::{Expr, ExprLit, Field, Lit, LitStr, Meta};

pub(crate) struct FieldAttrs {
    pub tags: Vec<(String, String)>,
    pub flatten: bool,
}

impl FieldAttrs {
    /// True when the `db` tag names the ignore marker, in which case no
    /// accessor is generated and the field type needs no value traits.
    pub fn ignored(&self) -> bool {
        self.tags
            .iter()
            .any(|(key, value)| key == "db" && value.split(',').next().map(str::trim) == Some("-"))
    }
}

pub(crate) fn parse_field_attrs(field: &Field) -> syn::Result<FieldAttrs> {
    let mut tags: Vec<(String, String)> = Vec::new();
    let mut flatten = false;

    for attr in &field.attrs {
        if attr.path().is_ident("db") {
            match &attr.meta {
                Meta::NameValue(nv) => {
                    let value = lit_str(&nv.value)?;
                    push_tag(&mut tags, "db", value.value(), &value)?;
                }
                Meta::List(_) => {
                    attr.parse_nested_meta(|meta| {
                        if meta.path.is_ident("flatten") {
                            flatten = true;
                            Ok(())
                        } else {
                            Err(meta.error("unsupported db option, expected `flatten`"))
                        }
                    })?;
                }
                Meta::Path(path) => {
                    return Err(syn::Error::new_spanned(
                        path,
                        "expected `#[db = \"...\"]` or `#[db(flatten)]`",
                    ));
                }
            }
        } else if attr.path().is_ident("tag") {
            attr.parse_nested_meta(|meta| {
                let key = meta
                    .path
                    .get_ident()
                    .map(ToString::to_string)
                    .ok_or_else(|| meta.error("tag key must be an identifier"))?;
                let value: LitStr = meta.value()?.parse()?;
                push_tag(&mut tags, &key, value.value(), &value)
            })?;
        }
    }

    Ok(FieldAttrs { tags, flatten })
}

fn push_tag(
    tags: &mut Vec<(String, String)>,
    key: &str,
    value: String,
    span: &LitStr,
) -> syn::Result<()> {
    if tags.iter().any(|(k, _)| k == key) {
        return Err(syn::Error::new_spanned(
            span,
            format!("duplicate `{key}` tag on field"),
        ));
    }
    tags.push((key.to_string(), value));
    Ok(())
}

fn lit_str(expr: &Expr) -> syn::Result<LitStr> {
    match expr {
        Expr::Lit(ExprLit {
            lit: Lit::Str(s), ..
        }) => Ok(s.clone()),
        other => Err(syn::Error::new_spanned(other, "expected a string literal")),
    }
}
