/// Configuration system
///
/// All configuration is persisted to `~/.aero/conf.txt`.
/// Format: `property=value` (one per line, comments with `#`).
///
/// CLI:
///   aero conf set property=value
///   aero conf get property
///   aero conf list
///   aero conf reset
///
/// Kept in the teacher's `conf.rs` shape (`PropDef` table, flat
/// `key=value` persistence, `list`/`describe`/`reset` CLI handlers)
/// but trimmed to the tunables this engine actually has: the map
/// engine's transition-fork threshold, the GC's nursery sizing, and
/// the regex engine's JIT/quick-check toggles.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct PropDef {
    pub name: &'static str,
    pub default: &'static str,
    pub description: &'static str,
    pub performance_impact: &'static str,
    pub category: Category,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Category {
    Debug,
    MapEngine,
    Gc,
    Regex,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub static ALL_PROPS: &[PropDef] = &[
    PropDef {
        name: "debug",
        default: "off",
        description: "Master debug switch. Enables the slower, assertion-heavy code paths \
                      in the map engine and scope resolver.",
        performance_impact: "HIGH",
        category: Category::Debug,
    },
    PropDef {
        name: "max_transition",
        default: "32",
        description: "Number of transitions a shared map may accumulate before the next \
                      `add_property` forces a unique fork (see map::MAX_TRANSITION).",
        performance_impact: "MEDIUM (higher values grow the transition graph; lower values fork sooner)",
        category: Category::MapEngine,
    },
    PropDef {
        name: "nursery_initial_cells",
        default: "65536",
        description: "Initial capacity, in cells, of the GC's young-generation bump arena.",
        performance_impact: "MEDIUM (larger nurseries mean fewer, more expensive minor collections)",
        category: Category::Gc,
    },
    PropDef {
        name: "regex_jit",
        default: "on",
        description: "Allow the regex engine to run its x86-64 JIT-compiled specialization \
                      when one is available for the compiled program; otherwise always use \
                      the portable interpreter.",
        performance_impact: "HIGH for supported patterns on x86-64",
        category: Category::Regex,
    },
    PropDef {
        name: "quick_check",
        default: "on",
        description: "Use a compiled program's quick-check prefilter to skip start positions \
                      that cannot possibly match before invoking the full matcher.",
        performance_impact: "MEDIUM (helps most on patterns with a fixed leading character)",
        category: Category::Regex,
    },
];

#[derive(Debug, Clone)]
pub struct Conf {
    values: HashMap<String, String>,
}

impl Conf {
    pub fn load() -> Self {
        let mut conf = Conf { values: HashMap::new() };
        for prop in ALL_PROPS {
            conf.values.insert(prop.name.to_string(), prop.default.to_string());
        }
        if let Some(path) = Self::config_path() {
            if let Ok(contents) = std::fs::read_to_string(&path) {
                for line in contents.lines() {
                    let line = line.trim();
                    if line.starts_with('#') || line.is_empty() {
                        continue;
                    }
                    if let Some((k, v)) = line.split_once('=') {
                        conf.values.insert(k.trim().to_string(), v.trim().to_string());
                    }
                }
            }
        }
        conf
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".aero").join("conf.txt"))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn get_bool(&self, key: &str) -> bool {
        matches!(self.get(key), Some("on") | Some("true") | Some("yes") | Some("1"))
    }

    pub fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<(), crate::errors::ConfError> {
        if !ALL_PROPS.iter().any(|p| p.name == key) {
            return Err(crate::errors::ConfError::UnknownProperty(key.to_string()));
        }
        self.values.insert(key.to_string(), value.to_string());
        self.save()
    }

    pub fn save(&self) -> Result<(), crate::errors::ConfError> {
        let path = Self::config_path().ok_or(crate::errors::ConfError::NoHomeDir)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(crate::errors::ConfError::Io)?;
        }

        let mut out = String::new();
        out.push_str("# aero configuration — ~/.aero/conf.txt\n");
        out.push_str("# Edit manually or use: aero conf set property=value\n");
        out.push_str("# Reset to defaults:   aero conf reset\n\n");

        let mut by_category: Vec<(&PropDef, &str)> = ALL_PROPS
            .iter()
            .map(|p| (p, self.values.get(p.name).map(|s| s.as_str()).unwrap_or(p.default)))
            .collect();
        by_category.sort_by_key(|(p, _)| format!("{:?}", p.category));

        let mut current_cat: Option<String> = None;
        for (prop, value) in &by_category {
            let cat = format!("{:?}", prop.category);
            if current_cat.as_deref() != Some(cat.as_str()) {
                out.push_str(&format!("\n# ── {cat} ──\n"));
                current_cat = Some(cat);
            }
            out.push_str(&format!("{}={}\n", prop.name, value));
        }

        std::fs::write(&path, &out).map_err(crate::errors::ConfError::Io)
    }

    pub fn reset() -> Result<(), crate::errors::ConfError> {
        let path = Self::config_path().ok_or(crate::errors::ConfError::NoHomeDir)?;
        let mut out = String::new();
        out.push_str("# aero configuration — reset to defaults\n\n");
        for prop in ALL_PROPS {
            out.push_str(&format!("{}={}\n", prop.name, prop.default));
        }
        std::fs::write(&path, &out).map_err(crate::errors::ConfError::Io)?;
        tracing::info!(path = %path.display(), "configuration reset to defaults");
        Ok(())
    }

    pub fn list(&self) {
        let mut by_category: Vec<&PropDef> = ALL_PROPS.iter().collect();
        by_category.sort_by_key(|p| format!("{:?}", p.category));

        let mut current_cat: Option<String> = None;
        for prop in by_category {
            let cat = format!("{}", prop.category);
            if current_cat.as_deref() != Some(cat.as_str()) {
                println!();
                println!("── {cat} ──");
                current_cat = Some(cat);
            }
            let current = self.get(prop.name).unwrap_or(prop.default);
            let marker = if current == prop.default { "  " } else { "* " };
            println!("{marker}{:<24} = {:<10}  (default: {})", prop.name, current, prop.default);
        }
        println!();
        println!("  * = overridden from default");
        println!("  Config file: {}", Self::config_path().map(|p| p.display().to_string()).unwrap_or_else(|| "N/A".into()));
    }

    pub fn describe(&self, key: &str) {
        let prop = ALL_PROPS.iter().find(|p| p.name == key);
        match prop {
            None => println!("Unknown property: '{key}'. Run `aero conf list` to see all."),
            Some(p) => {
                let current = self.get(p.name).unwrap_or(p.default);
                println!("┌─ {} ──", p.name);
                println!("│  Category:           {}", p.category);
                println!("│  Current value:      {current}");
                println!("│  Default value:      {}", p.default);
                println!("│");
                println!("│  Description:");
                for line in textwrap(p.description, 64) {
                    println!("│    {line}");
                }
                println!("│");
                println!("│  Performance impact: {}", p.performance_impact);
                println!("└──");
            }
        }
    }

    pub fn debug(&self) -> bool {
        self.get_bool("debug")
    }

    pub fn max_transition(&self) -> u32 {
        self.get_u32("max_transition", crate::map::MAX_TRANSITION)
    }

    pub fn nursery_initial_cells(&self) -> u32 {
        self.get_u32("nursery_initial_cells", 65536)
    }

    pub fn regex_jit(&self) -> bool {
        self.get_bool("regex_jit")
    }

    pub fn quick_check(&self) -> bool {
        self.get_bool("quick_check")
    }
}

fn textwrap(s: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let words: Vec<&str> = s.split_whitespace().collect();
    let mut current = String::new();
    for word in words {
        if current.len() + word.len() + 1 > width && !current.is_empty() {
            lines.push(current.trim().to_string());
            current = String::new();
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

pub fn cmd_conf_set(spec: &str) -> Result<(), crate::errors::ConfError> {
    let (k, v) = spec.split_once('=').ok_or_else(|| crate::errors::ConfError::BadSetSyntax(spec.to_string()))?;
    let (k, v) = (k.trim(), v.trim());
    let mut conf = Conf::load();
    conf.set(k, v)?;
    println!("Set {k}={v}");
    println!("  Config: {}", Conf::config_path().map(|p| p.display().to_string()).unwrap_or_default());
    Ok(())
}

pub fn cmd_conf_get(key: &str) -> Result<(), crate::errors::ConfError> {
    let conf = Conf::load();
    let val = conf.get(key).ok_or_else(|| crate::errors::ConfError::UnknownProperty(key.to_string()))?;
    println!("{key}={val}");
    if let Some(p) = ALL_PROPS.iter().find(|p| p.name == key) {
        println!("  default: {}", p.default);
        println!("  category: {}", p.category);
    }
    Ok(())
}

pub fn cmd_conf_list() {
    Conf::load().list();
}

pub fn cmd_conf_reset() -> Result<(), crate::errors::ConfError> {
    Conf::reset()
}

pub fn cmd_conf_describe(key: &str) {
    Conf::load().describe(key);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_a_config_file() {
        let conf = Conf::load();
        assert_eq!(conf.max_transition(), crate::map::MAX_TRANSITION);
        assert!(conf.regex_jit());
    }

    #[test]
    fn setting_an_unknown_key_is_rejected() {
        let mut conf = Conf::load();
        assert!(conf.set("not_a_real_property", "on").is_err());
    }
}
