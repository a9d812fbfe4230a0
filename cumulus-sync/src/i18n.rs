/// Translation seam for user-visible strings. Resolves to the English
/// source text until a locale layer is plugged in; callers always receive
/// an already-resolved string.
pub(crate) fn tr(text: &str) -> String {
    text.to_string()
}
