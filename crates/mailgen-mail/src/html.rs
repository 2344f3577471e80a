/// Render plain text for an HTML mail body: every line break becomes `<br>`.
///
/// No escaping is applied; the drafted content is sent as written.
pub fn text_to_html(content: &str) -> String {
    content.replace("\r\n", "<br>").replace('\n', "<br>")
}
