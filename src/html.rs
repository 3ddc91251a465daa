//! Rich-Text Container
//!
//! Builds and parses the HTML clipboard container: a plain-text header of
//! byte offsets followed by an HTML document whose fragment is bracketed by
//! start/end comment markers.
//!
//! ```text
//! Version:0.9
//! StartHTML:0000000105
//! EndHTML:0000000178
//! StartFragment:0000000141
//! EndFragment:0000000142
//! <html><body>
//! <!--StartFragment-->X<!--EndFragment-->
//! </body></html>
//! ```
//!
//! Offsets are ten-digit zero-padded decimals counted from byte 0 of the
//! UTF-8 output.

const HEADER_TEMPLATE: &str = "Version:0.9\r\n\
                               StartHTML:0000000000\r\n\
                               EndHTML:0000000000\r\n\
                               StartFragment:0000000000\r\n\
                               EndFragment:0000000000\r\n";

const PREFIX: &str = "<html><body>\r\n<!--StartFragment-->";
const SUFFIX: &str = "<!--EndFragment-->\r\n</body></html>";

/// Wrap an HTML fragment in the offset-annotated container
pub fn wrap_html(fragment: &str) -> Vec<u8> {
    let start_html = HEADER_TEMPLATE.len();
    let start_fragment = start_html + PREFIX.len();
    let end_fragment = start_fragment + fragment.len();
    let end_html = end_fragment + SUFFIX.len();

    let header = format!(
        "Version:0.9\r\n\
         StartHTML:{:010}\r\n\
         EndHTML:{:010}\r\n\
         StartFragment:{:010}\r\n\
         EndFragment:{:010}\r\n",
        start_html, end_html, start_fragment, end_fragment
    );
    debug_assert_eq!(header.len(), HEADER_TEMPLATE.len());

    let mut result = String::with_capacity(end_html);
    result.push_str(&header);
    result.push_str(PREFIX);
    result.push_str(fragment);
    result.push_str(SUFFIX);

    result.into_bytes()
}

/// Recover the fragment from a container produced by [`wrap_html`] or by
/// another application
///
/// Returns `None` when the header is missing or its offsets do not fit the
/// data.
pub fn fragment_from_html(data: &[u8]) -> Option<String> {
    let start = parse_header_value(data, "StartFragment:")?;
    let end = parse_header_value(data, "EndFragment:")?;

    if start > end || end > data.len() {
        return None;
    }

    Some(String::from_utf8_lossy(&data[start..end]).into_owned())
}

/// Parse a numeric header value; the header is ASCII even when the body is not
fn parse_header_value(data: &[u8], key: &str) -> Option<usize> {
    data.split(|&b| b == b'\n')
        .take_while(|line| !line.starts_with(b"<"))
        .find(|line| line.starts_with(key.as_bytes()))
        .and_then(|line| std::str::from_utf8(&line[key.len()..]).ok())
        .and_then(|value| value.trim().parse().ok())
}
