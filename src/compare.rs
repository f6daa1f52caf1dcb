//! Code-list differencing.
//!
//! Reads two ledgers in the `code |` format and writes the codes of the
//! second list that the first one does not contain.

use chrono::Local;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{archive_dir, ENTRY_DELIMITER};
use crate::error::{KmzError, Result};
use crate::report::ledger_entry;

/// 未送信コードの出力ファイル名
pub const NOT_SENT_FILE: &str = "naoenviados.txt";
/// 比較レポートのファイル名
pub const REPORT_FILE: &str = "relatorio-comparacao.txt";

const NOT_SENT_SAMPLE: usize = 10;
const ONLY_SENT_SAMPLE: usize = 5;
const RULE_WIDTH: usize = 50;

/// Deduplicated codes in first-seen order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CodeList {
    codes: Vec<String>,
    seen: HashSet<String>,
}

impl CodeList {
    /// Skips blank and `#` lines and strips the trailing delimiter.
    pub fn parse(text: &str) -> Self {
        let mut list = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let code = line.strip_suffix(ENTRY_DELIMITER).unwrap_or(line).trim();
            if !code.is_empty() {
                list.insert(code);
            }
        }
        list
    }

    pub fn read(path: &Path) -> Result<Self> {
        info!("Reading {:?}", path);
        let text = fs::read_to_string(path).map_err(|e| KmzError::io(path, e))?;
        let list = Self::parse(&text);
        info!("{} codes found", list.len());
        Ok(list)
    }

    fn insert(&mut self, code: &str) {
        if self.seen.insert(code.to_string()) {
            self.codes.push(code.to_string());
        }
    }

    pub fn contains(&self, code: &str) -> bool {
        self.seen.contains(code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.codes.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub sent_total: usize,
    pub to_verify_total: usize,
    pub common: usize,
    /// In the sent list only, in list order.
    pub only_in_sent: Vec<String>,
    /// In the list to verify only, in list order.
    pub not_sent: Vec<String>,
}

pub fn compare(sent: &CodeList, to_verify: &CodeList) -> Comparison {
    let not_sent: Vec<String> = to_verify
        .iter()
        .filter(|code| !sent.contains(code))
        .map(str::to_string)
        .collect();
    let only_in_sent: Vec<String> = sent
        .iter()
        .filter(|code| !to_verify.contains(code))
        .map(str::to_string)
        .collect();

    Comparison {
        sent_total: sent.len(),
        to_verify_total: to_verify.len(),
        common: sent.len() - only_in_sent.len(),
        only_in_sent,
        not_sent,
    }
}

impl Comparison {
    pub fn sorted_not_sent(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.not_sent.iter().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }

    fn percent_of_to_verify(&self, count: usize) -> f64 {
        if self.to_verify_total == 0 {
            return 0.0;
        }
        count as f64 / self.to_verify_total as f64 * 100.0
    }

    /// `#` header followed by the sorted codes, one `code |` per line.
    pub fn not_sent_ledger(&self, generated_at: &str) -> String {
        let codes = self.sorted_not_sent();
        let mut lines = vec![
            "# Códigos Não Enviados".to_string(),
            format!("# Gerado em: {}", generated_at),
            format!("# Total de códigos: {}", codes.len()),
            "# ".to_string(),
            String::new(),
        ];
        lines.extend(codes.into_iter().map(ledger_entry));
        lines.join("\n")
    }

    pub fn report(&self, generated_at: &str) -> String {
        let rule = "=".repeat(RULE_WIDTH);
        let mut lines = vec![
            "RELATÓRIO DE COMPARAÇÃO DE CÓDIGOS".to_string(),
            rule.clone(),
            String::new(),
            format!("Data/Hora: {}", generated_at),
            String::new(),
            "ESTATÍSTICAS GERAIS:".to_string(),
            format!("   • Códigos no Arquivo 1: {}", self.sent_total),
            format!("   • Códigos no Arquivo 2: {}", self.to_verify_total),
            format!("   • Códigos em comum: {}", self.common),
            format!("   • Apenas no Arquivo 1: {}", self.only_in_sent.len()),
            format!(
                "   • Apenas no Arquivo 2 (não enviados): {}",
                self.not_sent.len()
            ),
            String::new(),
            "ANÁLISE:".to_string(),
            format!(
                "   • Taxa de códigos já enviados: {:.1}%",
                self.percent_of_to_verify(self.to_verify_total - self.not_sent.len())
            ),
            format!(
                "   • Taxa de códigos novos: {:.1}%",
                self.percent_of_to_verify(self.not_sent.len())
            ),
            String::new(),
            "DETALHES:".to_string(),
            String::new(),
        ];

        push_sample(
            &mut lines,
            "PRIMEIROS CÓDIGOS NÃO ENVIADOS:",
            &self.not_sent,
            NOT_SENT_SAMPLE,
        );
        push_sample(
            &mut lines,
            &format!("CÓDIGOS APENAS NO ARQUIVO 1 (primeiros {}):", ONLY_SENT_SAMPLE),
            &self.only_in_sent,
            ONLY_SENT_SAMPLE,
        );

        lines.push(rule);
        lines.push("Relatório gerado pelo Comparador de Códigos KMZ".to_string());
        lines.join("\n")
    }
}

fn push_sample(lines: &mut Vec<String>, title: &str, codes: &[String], limit: usize) {
    if codes.is_empty() {
        return;
    }
    lines.push(title.to_string());
    for (i, code) in codes.iter().take(limit).enumerate() {
        lines.push(format!("   {:02}. {}", i + 1, code));
    }
    if codes.len() > limit {
        lines.push(format!("   ... e mais {} códigos", codes.len() - limit));
    }
    lines.push(String::new());
}

#[derive(Debug)]
pub struct CompareOutcome {
    pub comparison: Comparison,
    pub not_sent_path: PathBuf,
    /// `None` when the report could not be written.
    pub report_path: Option<PathBuf>,
}

/// Compares two ledger files and writes the results to `output_dir`
/// (default: the directory of `to_verify`).
///
/// Only the not-sent ledger is mandatory; a report write failure is logged.
pub fn compare_files(
    sent: &Path,
    to_verify: &Path,
    output_dir: Option<&Path>,
) -> Result<CompareOutcome> {
    let output_dir = match output_dir {
        Some(dir) => dir.to_path_buf(),
        None => archive_dir(to_verify),
    };
    debug!("Comparison output directory: {:?}", output_dir);

    let sent_codes = CodeList::read(sent)?;
    let to_verify_codes = CodeList::read(to_verify)?;
    let comparison = compare(&sent_codes, &to_verify_codes);
    info!("{} codes not sent yet", comparison.not_sent.len());

    let generated_at = Local::now().format("%d/%m/%Y %H:%M:%S").to_string();
    fs::create_dir_all(&output_dir).map_err(|e| KmzError::io(&output_dir, e))?;

    let not_sent_path = output_dir.join(NOT_SENT_FILE);
    fs::write(&not_sent_path, comparison.not_sent_ledger(&generated_at))
        .map_err(|e| KmzError::io(&not_sent_path, e))?;
    info!("Written: {:?}", not_sent_path);

    let report_path = output_dir.join(REPORT_FILE);
    let report_path = match fs::write(&report_path, comparison.report(&generated_at)) {
        Ok(()) => {
            info!("Written: {:?}", report_path);
            Some(report_path)
        }
        Err(e) => {
            warn!("Failed to write report {:?}: {}", report_path, e);
            None
        }
    };

    Ok(CompareOutcome {
        comparison,
        not_sent_path,
        report_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_ledger_lines() {
        let list = CodeList::parse("# cabeçalho\n\nA |\n  B |  \nC\nA |\n#D |\n");
        assert_eq!(list.iter().collect::<Vec<_>>(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_not_sent_codes() {
        let sent = CodeList::parse("A |\nB |\nC |");
        let to_verify = CodeList::parse("A |\nB |\nD |");

        let result = compare(&sent, &to_verify);

        assert_eq!(result.not_sent, vec!["D"]);
        assert_eq!(result.only_in_sent, vec!["C"]);
        assert_eq!(result.common, 2);
    }

    #[test]
    fn test_not_sent_ledger_is_sorted_and_readable_again() {
        let sent = CodeList::parse("A |");
        let to_verify = CodeList::parse("Z |\nA |\nM |");
        let ledger = compare(&sent, &to_verify).not_sent_ledger("01/01/2025 10:00:00");

        assert!(ledger.starts_with("# Códigos Não Enviados\n# Gerado em: 01/01/2025 10:00:00"));
        assert!(ledger.ends_with("M |\nZ |"));
        assert_eq!(
            CodeList::parse(&ledger).iter().collect::<Vec<_>>(),
            vec!["M", "Z"]
        );
    }

    #[test]
    fn test_report_with_empty_list_to_verify() {
        let result = compare(&CodeList::parse("A |"), &CodeList::default());
        let report = result.report("agora");

        assert!(report.contains("Taxa de códigos já enviados: 0.0%"));
        assert!(report.contains("Taxa de códigos novos: 0.0%"));
        assert!(report.contains("01. A"));
        assert!(!report.contains("NÃO ENVIADOS:"));
    }

    #[test]
    fn test_report_samples_are_capped() {
        let codes: Vec<String> = (0..12).map(|i| format!("C{:02} |", i)).collect();
        let result = compare(&CodeList::default(), &CodeList::parse(&codes.join("\n")));
        let report = result.report("agora");

        assert!(report.contains("10. C09"));
        assert!(!report.contains("11. C10"));
        assert!(report.contains("... e mais 2 códigos"));
        assert!(report.contains("Taxa de códigos novos: 100.0%"));
    }

    #[test]
    fn test_compare_files_writes_next_to_second_list() {
        let temp_dir = TempDir::new().unwrap();
        let sent = temp_dir.path().join("enviados.txt");
        let to_verify = temp_dir.path().join("Codigos-salvos-regularizado.txt");
        fs::write(&sent, "A |\nB |\nC |").unwrap();
        fs::write(&to_verify, "A |\nB |\nD |").unwrap();

        let outcome = compare_files(&sent, &to_verify, None).unwrap();

        assert_eq!(outcome.not_sent_path, temp_dir.path().join(NOT_SENT_FILE));
        assert_eq!(outcome.report_path, Some(temp_dir.path().join(REPORT_FILE)));
        let written = CodeList::read(&outcome.not_sent_path).unwrap();
        assert_eq!(written.iter().collect::<Vec<_>>(), vec!["D"]);
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nao-existe.txt");
        assert!(compare_files(&missing, &missing, None).is_err());
    }
}
