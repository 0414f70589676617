pub(crate) fn print_trace_line(line: &str) {
    const RESET: &str = "\x1b[0m";
    const TYPING: &str = "\x1b[34m";
    const REPLACE: &str = "\x1b[33m";
    const RECALL: &str = "\x1b[31m";
    const STICKER: &str = "\x1b[35m";

    if let Some(rest) = line.strip_prefix("Typing") {
        eprintln!("{TYPING}Typing{RESET}{rest}");
    } else if let Some(rest) = line.strip_prefix("Replace") {
        eprintln!("{REPLACE}Replace{RESET}{rest}");
    } else if let Some(rest) = line.strip_prefix("Recall") {
        eprintln!("{RECALL}Recall{RESET}{rest}");
    } else if let Some(rest) = line.strip_prefix("Sticker") {
        eprintln!("{STICKER}Sticker{RESET}{rest}");
    } else {
        eprintln!("{line}");
    }
}
