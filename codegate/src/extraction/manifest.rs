//! Plain-regex fallback for package manifests. Manifests carry exact
//! dependency names, no grammar needed.

use lazy_static::lazy_static;
use regex::Regex;

use crate::packages::types::{Ecosystem, ExtractedPackage, PackageLocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    RequirementsTxt,
    PackageJson,
    PyprojectToml,
    GoMod,
    CargoToml,
}

impl ManifestKind {
    pub fn from_filename(filename: &str) -> Option<Self> {
        let basename = filename.rsplit('/').next().unwrap_or(filename);
        match basename {
            "requirements.txt" | "requirements-dev.txt" | "requirements_dev.txt" => {
                Some(ManifestKind::RequirementsTxt)
            }
            "package.json" => Some(ManifestKind::PackageJson),
            "pyproject.toml" => Some(ManifestKind::PyprojectToml),
            "go.mod" => Some(ManifestKind::GoMod),
            "Cargo.toml" => Some(ManifestKind::CargoToml),
            _ => None,
        }
    }

    pub fn ecosystem(&self) -> Ecosystem {
        match self {
            ManifestKind::RequirementsTxt | ManifestKind::PyprojectToml => Ecosystem::Pypi,
            ManifestKind::PackageJson => Ecosystem::Npm,
            ManifestKind::GoMod => Ecosystem::Go,
            ManifestKind::CargoToml => Ecosystem::Crates,
        }
    }
}

lazy_static! {
    static ref REQUIREMENT_LINE: Regex =
        Regex::new(r"(?m)^\s*([A-Za-z0-9][A-Za-z0-9._\-]*)").unwrap();
    static ref GO_REQUIRE: Regex =
        Regex::new(r"(?m)^\s*(?:require\s+)?([A-Za-z0-9.\-_/]+\.[A-Za-z0-9.\-_/]+)\s+v[0-9]")
            .unwrap();
    static ref TOML_SECTION: Regex = Regex::new(r"(?m)^\[([^\]]+)\]").unwrap();
    static ref TOML_KEY: Regex =
        Regex::new(r#"(?m)^\s*([A-Za-z0-9._\-]+)\s*="#).unwrap();
    static ref PYPROJECT_DEP_STRING: Regex =
        Regex::new(r#""([A-Za-z0-9][A-Za-z0-9._\-]*)[^"]*""#).unwrap();
}

fn requirements_txt(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty() && !line.starts_with('#') && !line.starts_with('-')
        })
        .filter_map(|line| {
            REQUIREMENT_LINE
                .captures(line)
                .map(|caps| caps[1].to_owned())
        })
        .collect()
}

fn package_json(content: &str) -> Vec<String> {
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(content) else {
        return Vec::new();
    };
    let mut names = Vec::new();
    for section in ["dependencies", "devDependencies", "peerDependencies"] {
        if let Some(map) = parsed.get(section).and_then(|value| value.as_object()) {
            names.extend(map.keys().cloned());
        }
    }
    names
}

fn pyproject_toml(content: &str) -> Vec<String> {
    let mut names = Vec::new();
    // PEP 621 list form: dependencies = ["flask>=2", ...]
    let mut in_dependency_list = false;
    // poetry table form: [tool.poetry.dependencies]
    let mut in_poetry_table = false;
    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(caps) = TOML_SECTION.captures(trimmed) {
            in_poetry_table = caps[1].ends_with("dependencies");
            in_dependency_list = false;
            continue;
        }
        if trimmed.starts_with("dependencies") && trimmed.contains('[') {
            in_dependency_list = true;
        }
        if in_dependency_list {
            for caps in PYPROJECT_DEP_STRING.captures_iter(trimmed) {
                names.push(caps[1].to_owned());
            }
            if trimmed.ends_with(']') {
                in_dependency_list = false;
            }
            continue;
        }
        if in_poetry_table {
            if let Some(caps) = TOML_KEY.captures(trimmed) {
                let name = caps[1].to_owned();
                if name != "python" {
                    names.push(name);
                }
            }
        }
    }
    names
}

fn go_mod(content: &str) -> Vec<String> {
    GO_REQUIRE
        .captures_iter(content)
        .map(|caps| caps[1].to_owned())
        .collect()
}

fn cargo_toml(content: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut in_dependencies = false;
    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(caps) = TOML_SECTION.captures(trimmed) {
            let section = &caps[1];
            in_dependencies = section == "dependencies"
                || section == "dev-dependencies"
                || section == "build-dependencies"
                || section.ends_with(".dependencies");
            continue;
        }
        if in_dependencies {
            if let Some(caps) = TOML_KEY.captures(trimmed) {
                names.push(caps[1].to_owned());
            }
        }
    }
    names
}

pub fn parse_manifest(kind: ManifestKind, content: &str) -> Vec<ExtractedPackage> {
    let names = match kind {
        ManifestKind::RequirementsTxt => requirements_txt(content),
        ManifestKind::PackageJson => package_json(content),
        ManifestKind::PyprojectToml => pyproject_toml(content),
        ManifestKind::GoMod => go_mod(content),
        ManifestKind::CargoToml => cargo_toml(content),
    };
    names
        .into_iter()
        .map(|name| ExtractedPackage::new(kind.ecosystem(), name, PackageLocation::Manifest))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirements_lines_are_name_only() {
        let found = parse_manifest(
            ManifestKind::RequirementsTxt,
            "# comment\nrequests==2.31.0\nflask>=2,<3\n-r other.txt\ninvokehttp\n",
        );
        let names: Vec<&str> = found.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["requests", "flask", "invokehttp"]);
    }

    #[test]
    fn package_json_sections_are_merged() {
        let found = parse_manifest(
            ManifestKind::PackageJson,
            r#"{"dependencies": {"express": "^4"}, "devDependencies": {"jest": "^29"}}"#,
        );
        let names: Vec<&str> = found.iter().map(|p| p.name.as_str()).collect();
        assert!(names.contains(&"express"));
        assert!(names.contains(&"jest"));
    }

    #[test]
    fn pyproject_both_forms_parse() {
        let pep621 = "[project]\ndependencies = [\"flask>=2\", \"requests==2.31\"]\n";
        let names: Vec<String> = parse_manifest(ManifestKind::PyprojectToml, pep621)
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["flask", "requests"]);

        let poetry = "[tool.poetry.dependencies]\npython = \"^3.11\"\nhttpx = \"*\"\n";
        let names: Vec<String> = parse_manifest(ManifestKind::PyprojectToml, poetry)
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["httpx"]);
    }

    #[test]
    fn go_mod_requires_parse_both_forms() {
        let content = "module m\n\nrequire github.com/pkg/errors v0.9.1\n\nrequire (\n\tgolang.org/x/net v0.17.0\n)\n";
        let names: Vec<String> = parse_manifest(ManifestKind::GoMod, content)
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(
            names,
            vec!["github.com/pkg/errors", "golang.org/x/net"]
        );
    }

    #[test]
    fn cargo_toml_dependency_tables_parse() {
        let content = "[package]\nname = \"x\"\n\n[dependencies]\nserde = \"1\"\ntokio = { version = \"1\" }\n\n[dev-dependencies]\ntempfile = \"3\"\n";
        let names: Vec<String> = parse_manifest(ManifestKind::CargoToml, content)
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["serde", "tokio", "tempfile"]);
    }
}
