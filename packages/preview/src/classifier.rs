// ABOUTME: Dev-server classification policy for processes found on scanned ports
// ABOUTME: Denylist of desktop apps beats an allowlist of runtimes and frameworks

use crate::types::Classification;

/// Desktop applications that commonly hold local ports but are never dev
/// servers. Matched case-sensitively against the raw command line.
const DENYLIST: &[&str] = &[
    "Google Chrome",
    "Chrome Helper",
    "Safari",
    "Firefox",
    "Brave",
    "Edge",
    "Opera",
    "Vivaldi",
    "Chromium",
    "Electron",
    "Slack",
    "Discord",
    "Spotify",
    "iTunes",
    "Music",
    "TV",
    "Finder",
];

/// Runtimes, build tools and frameworks that indicate a dev server. Matched
/// against the lowercased command line.
const ALLOWLIST: &[&str] = &[
    "node", "python", "ruby", "java", "php", "go", "cargo", "webpack", "vite", "next", "react",
    "vue", "angular", "django", "flask", "rails", "spring",
];

/// Decide whether a process command line looks like a development server.
///
/// Anything matching neither list is excluded.
pub fn is_likely_dev_server(command: &str) -> Classification {
    if DENYLIST.iter().any(|name| command.contains(name)) {
        return Classification::Excluded;
    }

    let lowered = command.to_lowercase();
    if ALLOWLIST.iter().any(|fragment| lowered.contains(fragment)) {
        Classification::DevServer
    } else {
        Classification::Excluded
    }
}

/// Detect framework from command line
pub fn detect_framework_from_command(command: &str) -> Option<String> {
    let command_str = command.to_lowercase();

    // Most specific first
    let framework = if command_str.contains("next") {
        "Next.js"
    } else if command_str.contains("vite") {
        "Vite"
    } else if command_str.contains("react-scripts") || command_str.contains("create-react-app") {
        "React"
    } else if command_str.contains("webpack") {
        "Webpack"
    } else if command_str.contains("vue-cli") || command_str.contains("@vue/cli") {
        "Vue"
    } else if command_str.contains("angular") || command_str.contains("ng serve") {
        "Angular"
    } else if command_str.contains("flask") {
        "Flask"
    } else if command_str.contains("django") || command_str.contains("manage.py") {
        "Django"
    } else if command_str.contains("rails") || command_str.contains("puma") {
        "Rails"
    } else if command_str.contains("deno") {
        "Deno"
    } else {
        return None;
    };

    Some(framework.to_string())
}
