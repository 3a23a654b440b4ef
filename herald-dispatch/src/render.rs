//! Merge-tag substitution.
//!
//! Templates carry `{{tag}}` placeholders. Built-in tags are `email`,
//! `name`, and `tracking_id`; anything else is looked up in the
//! recipient's merge fields. Unknown tags render empty, and an unterminated
//! opening brace is passed through literally.

use herald_store::Recipient;

/// Substitute merge tags in `template` with the recipient's values.
#[must_use]
pub fn render(template: &str, recipient: &Recipient) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        if let Some(end) = after.find("}}") {
            out.push_str(lookup(recipient, after[..end].trim()));
            rest = &after[end + 2..];
        } else {
            // No closing braces; keep the remainder as-is.
            out.push_str(&rest[start..]);
            return out;
        }
    }

    out.push_str(rest);
    out
}

fn lookup<'a>(recipient: &'a Recipient, tag: &str) -> &'a str {
    match tag {
        "email" => &recipient.email,
        "name" => recipient.name.as_deref().unwrap_or(""),
        "tracking_id" => &recipient.tracking_id,
        _ => recipient
            .merge_fields
            .get(tag)
            .map_or("", String::as_str),
    }
}
