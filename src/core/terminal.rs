use console::{style, Emoji};

pub static LOOKING_GLASS: Emoji<'_, '_> = Emoji("🔍 ", "");
pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_step(step: &str) {
    println!("{} {}", SPARKLE, style(step).bold());
}

pub fn print_banner() {
    println!();
    println!(
        "  {}  {}",
        style("adjudex").bold().cyan(),
        style(env!("CARGO_PKG_VERSION")).dim()
    );
    println!(
        "  {}",
        style("clinical review runs, audited end to end").dim()
    );
    println!();
}

pub fn print_goodbye() {
    println!(
        "\n{} {}",
        SPARKLE,
        style("Review service stopped. Goodbye!").bold().cyan()
    );
}

/// Titled block of help or status lines, built by chaining and printed
/// in one go.
pub struct GuideSection {
    title: String,
    lines: Vec<String>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, desc: &str) -> Self {
        self.lines.push(format!(
            "  {} {}",
            style(format!("{:<10}", name)).cyan().bold(),
            desc
        ));
        self
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines.push(format!(
            "  {} {}",
            style(format!("{:<14}", label)).bold(),
            value
        ));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.lines.push(format!("  {}", text));
        self
    }

    pub fn info(mut self, text: &str) -> Self {
        self.lines.push(format!("  {} {}", INFO_ICON, text));
        self
    }

    pub fn warn(mut self, text: &str) -> Self {
        self.lines
            .push(format!("  {} {}", WARN_ICON, style(text).yellow()));
        self
    }

    pub fn hint(mut self, example: &str, note: &str) -> Self {
        if note.is_empty() {
            self.lines.push(format!("  $ {}", style(example).green()));
        } else {
            self.lines.push(format!(
                "  $ {}  {}",
                style(example).green(),
                style(note).dim()
            ));
        }
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(String::new());
        self
    }

    pub fn print(self) {
        println!("\n {}", style(self.title).bold().underlined());
        for line in &self.lines {
            println!("{}", line);
        }
    }
}
