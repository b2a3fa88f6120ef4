use streamdrop_core::media::PlayerLinks;

/// What the public file page shows
#[derive(Debug, Clone)]
pub struct ShowPage<'a> {
    pub file_name: &'a str,
    pub file_size: &'a str,
    pub mime_type: &'a str,
    pub is_media: bool,
    pub links: &'a PlayerLinks,
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

impl ShowPage<'_> {
    pub fn render(&self) -> String {
        let name = escape_html(self.file_name);
        let size = escape_html(self.file_size);
        let direct = escape_html(&self.links.direct_dl_link);

        let player = if self.is_media {
            format!(
                "<video controls preload=\"metadata\" src=\"{direct}\" type=\"{}\"></video>\n\
                 <p><a href=\"{}\">MX Player</a> | <a href=\"{}\">VLC</a></p>\n",
                escape_html(self.mime_type),
                escape_html(&self.links.mx_player_link),
                escape_html(&self.links.vlc_player_link),
            )
        } else {
            String::new()
        };

        format!(
            "<!DOCTYPE html>\n\
             <html lang=\"en\">\n\
             <head><meta charset=\"utf-8\"><title>{name}</title></head>\n\
             <body>\n\
             <h1>{name}</h1>\n\
             <p>Size: {size}</p>\n\
             {player}\
             <p><a href=\"{direct}\" download>Download</a></p>\n\
             </body>\n\
             </html>\n"
        )
    }
}
