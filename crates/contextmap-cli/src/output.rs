use contextmap_core::store::Anchor;

const PREFIX: &str = "contextmap";

pub fn format_anchor(anchor: &Anchor) -> String {
    match anchor {
        Anchor::Fresh => format!("{PREFIX}: fresh session, no previous context\n"),
        Anchor::Recap(text) => {
            let mut out = format!("{PREFIX}: where you left off:\n");
            for line in text.lines() {
                out.push_str("  ");
                out.push_str(line);
                out.push('\n');
            }
            out
        }
    }
}

pub fn anchor(anchor: &Anchor) {
    eprint!("{}", format_anchor(anchor));
}

pub fn notice(message: impl AsRef<str>) {
    eprintln!("{PREFIX}: {}", message.as_ref());
}

pub fn warn(message: impl AsRef<str>) {
    eprintln!("{PREFIX}: warning: {}", message.as_ref());
}

pub fn error(err: &anyhow::Error) {
    eprintln!("{PREFIX}: error: {err:#}");
}
