//! `{placeholder}` substitution for configured URLs and query values.

use crate::hour_window::HourWindow;

/// Values available to URL templates.
#[derive(Debug, Clone)]
pub struct TemplateVars<'a> {
    pub username: &'a str,
    pub folder: &'a str,
    pub window: &'a HourWindow,
    pub epoch_ms: i64,
    pub name: Option<&'a str>,
}

impl<'a> TemplateVars<'a> {
    pub fn new(username: &'a str, folder: &'a str, window: &'a HourWindow) -> Self {
        Self {
            username,
            folder,
            window,
            epoch_ms: chrono::Utc::now().timestamp_millis(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: &'a str) -> Self {
        self.name = Some(name);
        self
    }

    fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "username" => Some(self.username.to_string()),
            "folder" => Some(self.folder.to_string()),
            "date" => Some(self.window.date().format("%d/%m/%Y").to_string()),
            "ymd" => Some(self.window.date().format("%Y%m%d").to_string()),
            "stamp" => Some(self.window.stamp()),
            "epoch_ms" => Some(self.epoch_ms.to_string()),
            "name" => self.name.map(str::to_string),
            _ => None,
        }
    }
}

/// Replace known `{key}`s in `template`; unknown keys are left as written.
pub fn render(template: &str, vars: &TemplateVars<'_>) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match vars.lookup(key) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_all_keys() {
        let window = HourWindow::from_stamp("2024050109").unwrap();
        let mut vars = TemplateVars::new("maayan2000", "stores", &window).with_name("Price.gz");
        vars.epoch_ms = 1714550000000;

        assert_eq!(
            render("https://{username}.binaprojects.com/MainIO_Hok.aspx", &vars),
            "https://maayan2000.binaprojects.com/MainIO_Hok.aspx"
        );
        assert_eq!(render("{date}", &vars), "01/05/2024");
        assert_eq!(render("{ymd}/{stamp}", &vars), "20240501/2024050109");
        assert_eq!(render("{epoch_ms}", &vars), "1714550000000");
        assert_eq!(render("/{folder}/{name}", &vars), "/stores/Price.gz");
    }

    #[test]
    fn test_unknown_and_unclosed_left_alone() {
        let window = HourWindow::from_stamp("2024050109").unwrap();
        let vars = TemplateVars::new("u", "", &window);
        assert_eq!(render("a{nope}b", &vars), "a{nope}b");
        assert_eq!(render("a{name}b", &vars), "a{name}b");
        assert_eq!(render("tail{open", &vars), "tail{open");
    }
}
