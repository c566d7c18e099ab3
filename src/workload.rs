//! Reads the input CSV into work items.
//!
//! A run workload needs a prompt column and a `token_count` column; an
//! optional `max_output_tokens` column overrides the default output limit.
//! Rows heavier than the context ceiling are dropped up front and counted.
//! A judge workload builds each prompt from a template over three columns of
//! a previous run's output instead; a distractor workload does the same over
//! the rows the judge marked wrong.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{HarnessError, Result};

pub const TOKEN_COUNT_COLUMN: &str = "token_count";
pub const MAX_OUTPUT_TOKENS_COLUMN: &str = "max_output_tokens";

/// Weight and output limit used for every judge item.
pub const JUDGE_ITEM_WEIGHT: u64 = 100;
pub const JUDGE_MAX_OUTPUT_TOKENS: u32 = 100;

pub const DEFAULT_JUDGE_PROMPT: &str = "\
根據這個問題和正確答案，判斷回應是否正確（意思是它在事實上與正確答案一致）。
你必須只回應 \"true\" 或 \"false\"。
如果回應有部分不正確，例如拼寫錯誤，請回應 \"false\"。
如果回應包含文本片段或額外的支持信息，但仍然保持正確答案且沒有改變意思，請回應 \"true\"。
如果回應以類似「以下是文件中最相關的資訊：」開頭，請回應 \"true\"。只要後續內容與正確答案一致即可。

問題：{question}

正確答案：{correct_answer}

需要判斷的回應：{output}

指示：只回應 \"true\"（如果回應在事實上與正確答案一致）或 \"false\"（如果不一致）。不要提供任何解釋 - 只需回答 \"true\" 或 \"false\"。";

pub const DEFAULT_DISTRACTOR_PROMPT: &str = "\
根據這個模型輸出，它對以下問題給出了什麼回應：{question}

選擇最接近的選項，如果沒有一個選項符合或提到了多個選項，則選擇「以上皆非」（-1）。
如果提到了某個選項但不是確定的，並且有猶豫，提到「然而」或表示輕微猶豫的內容，則選擇「以上皆非」（-1）。
如果提到文件中存在不一致，則選擇「以上皆非」（-1）。

選項：
{distractors}

模型輸出：{output}

再次提醒，如果提到了多個選項或有任何猶豫，則選擇「以上皆非」（-1）。

指示：只輸出數字。如果沒有提到任何特定選項，輸出 -1。";

/// One unit of work. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Position in the filtered workload; also the checkpoint row index.
    pub id: usize,
    pub prompt: String,
    pub weight: u64,
    pub max_output_tokens: u32,
}

/// The filtered input plus the columns that seed a fresh checkpoint.
#[derive(Debug, Clone)]
pub struct Workload {
    pub items: Vec<WorkItem>,
    /// Input columns carried into the checkpoint (the prompt column is not).
    pub columns: Vec<String>,
    /// One record per item, aligned with `columns`.
    pub records: Vec<Vec<String>>,
    pub total_rows: usize,
    pub filtered_out: usize,
}

/// Prompt template for grading earlier outputs.
#[derive(Debug, Clone)]
pub struct JudgeTemplate {
    pub prompt: String,
    pub output_column: String,
    pub question_column: String,
    pub answer_column: String,
    /// Numbered option list filled into `{distractors}`; empty when unused.
    pub distractors: String,
}

impl Default for JudgeTemplate {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_JUDGE_PROMPT.to_string(),
            output_column: "output".to_string(),
            question_column: "question".to_string(),
            answer_column: "answer".to_string(),
            distractors: String::new(),
        }
    }
}

impl JudgeTemplate {
    /// Fills `{output}`, `{question}`, `{correct_answer}` and `{distractors}`.
    ///
    /// One left-to-right pass over the template: substituted text is never
    /// scanned again, so a placeholder inside a model output stays literal.
    /// Unknown `{...}` sequences are copied as-is.
    pub fn render(&self, output: &str, question: &str, correct_answer: &str) -> String {
        let values = [
            ("{output}", output),
            ("{question}", question),
            ("{correct_answer}", correct_answer),
            ("{distractors}", self.distractors.as_str()),
        ];

        let mut rendered = String::with_capacity(self.prompt.len() + output.len());
        let mut rest = self.prompt.as_str();
        while let Some(open) = rest.find('{') {
            rendered.push_str(&rest[..open]);
            rest = &rest[open..];
            match values.iter().find(|(key, _)| rest.starts_with(key)) {
                Some((key, value)) => {
                    rendered.push_str(value);
                    rest = &rest[key.len()..];
                }
                None => {
                    rendered.push('{');
                    rest = &rest[1..];
                }
            }
        }
        rendered.push_str(rest);
        rendered
    }
}

#[derive(Debug, Deserialize)]
struct DistractorEntry {
    rewrite_for_analysis: String,
}

/// Reads a distractors JSON file into the numbered list `{distractors}` expects.
///
/// The file maps keys to objects with a `rewrite_for_analysis` text; entries
/// are ordered by key and numbered from 0, one per line.
pub fn load_distractors(path: &Path) -> Result<String> {
    let contents = std::fs::read_to_string(path)?;
    let entries: BTreeMap<String, DistractorEntry> = serde_json::from_str(&contents)?;
    Ok(entries
        .values()
        .enumerate()
        .map(|(i, entry)| format!("{i}. {}", entry.rewrite_for_analysis))
        .collect::<Vec<_>>()
        .join("\n"))
}

/// True for the cells a CSV reader would take as boolean false.
fn is_false(cell: &str) -> bool {
    cell.trim().eq_ignore_ascii_case("false")
}

fn column_index(headers: &csv::StringRecord, name: &str, path: &Path) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| HarnessError::MissingColumn {
            path: path.to_path_buf(),
            column: name.to_string(),
        })
}

/// Parses an integer cell, accepting the `"1200.0"` form spreadsheet tools write.
fn parse_count(value: &str, path: &Path, row: usize, column: &str) -> Result<u64> {
    let trimmed = value.trim();
    if let Ok(n) = trimmed.parse::<u64>() {
        return Ok(n);
    }
    match trimmed.parse::<f64>() {
        Ok(f) if f >= 0.0 && f.fract() == 0.0 => Ok(f as u64),
        _ => Err(HarnessError::InvalidValue {
            path: path.to_path_buf(),
            row,
            column: column.to_string(),
            value: value.to_string(),
        }),
    }
}

impl Workload {
    /// Loads a run workload, dropping rows whose weight exceeds `max_context_weight`.
    pub fn from_csv(
        path: &Path,
        prompt_column: &str,
        max_context_weight: u64,
        default_max_output_tokens: u32,
    ) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        let prompt_idx = column_index(&headers, prompt_column, path)?;
        let weight_idx = column_index(&headers, TOKEN_COUNT_COLUMN, path)?;
        let max_out_idx = headers.iter().position(|h| h == MAX_OUTPUT_TOKENS_COLUMN);

        let columns = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != prompt_idx)
            .map(|(_, h)| h.to_string())
            .collect();

        let mut items = Vec::new();
        let mut records = Vec::new();
        let mut total_rows = 0;

        for (row, record) in reader.records().enumerate() {
            let record = record?;
            total_rows += 1;

            let weight = parse_count(&record[weight_idx], path, row, TOKEN_COUNT_COLUMN)?;
            if weight > max_context_weight {
                continue;
            }

            let max_output_tokens = match max_out_idx {
                Some(i) if !record[i].trim().is_empty() => {
                    let n = parse_count(&record[i], path, row, MAX_OUTPUT_TOKENS_COLUMN)?;
                    u32::try_from(n).unwrap_or(u32::MAX)
                }
                _ => default_max_output_tokens,
            };

            items.push(WorkItem {
                id: items.len(),
                prompt: record[prompt_idx].to_string(),
                weight,
                max_output_tokens,
            });
            records.push(
                record
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != prompt_idx)
                    .map(|(_, v)| v.to_string())
                    .collect(),
            );
        }

        let filtered_out = total_rows - items.len();
        Ok(Self {
            items,
            columns,
            records,
            total_rows,
            filtered_out,
        })
    }

    /// Loads a judge workload from a finished run's output.
    ///
    /// Every column is kept and every row is graded; the template decides the prompt.
    pub fn for_judge(path: &Path, template: &JudgeTemplate) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        let output_idx = column_index(&headers, &template.output_column, path)?;
        let question_idx = column_index(&headers, &template.question_column, path)?;
        let answer_idx = column_index(&headers, &template.answer_column, path)?;

        let mut items = Vec::new();
        let mut records = Vec::new();
        for record in reader.records() {
            let record = record?;
            items.push(WorkItem {
                id: items.len(),
                prompt: template.render(
                    &record[output_idx],
                    &record[question_idx],
                    &record[answer_idx],
                ),
                weight: JUDGE_ITEM_WEIGHT,
                max_output_tokens: JUDGE_MAX_OUTPUT_TOKENS,
            });
            records.push(record.iter().map(str::to_string).collect());
        }

        let total_rows = items.len();
        Ok(Self {
            items,
            columns: headers.iter().map(str::to_string).collect(),
            records,
            total_rows,
            filtered_out: 0,
        })
    }

    /// Loads the rows a judge marked wrong, for labelling which distractor
    /// the model picked.
    ///
    /// Keeps rows whose `verdict_column` is `false` and whose `token_count`
    /// is within `max_context_weight`; the rest count as filtered out. Items
    /// carry their real token count as weight.
    pub fn for_distractors(
        path: &Path,
        template: &JudgeTemplate,
        verdict_column: &str,
        max_context_weight: u64,
    ) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        let output_idx = column_index(&headers, &template.output_column, path)?;
        let question_idx = column_index(&headers, &template.question_column, path)?;
        let answer_idx = column_index(&headers, &template.answer_column, path)?;
        let weight_idx = column_index(&headers, TOKEN_COUNT_COLUMN, path)?;
        let verdict_idx = column_index(&headers, verdict_column, path)?;

        let mut items = Vec::new();
        let mut records = Vec::new();
        let mut total_rows = 0;
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            total_rows += 1;

            let weight = parse_count(&record[weight_idx], path, row, TOKEN_COUNT_COLUMN)?;
            if weight > max_context_weight || !is_false(&record[verdict_idx]) {
                continue;
            }
            items.push(WorkItem {
                id: items.len(),
                prompt: template.render(
                    &record[output_idx],
                    &record[question_idx],
                    &record[answer_idx],
                ),
                weight,
                max_output_tokens: JUDGE_MAX_OUTPUT_TOKENS,
            });
            records.push(record.iter().map(str::to_string).collect());
        }

        let filtered_out = total_rows - items.len();
        Ok(Self {
            items,
            columns: headers.iter().map(str::to_string).collect(),
            records,
            total_rows,
            filtered_out,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn get(&self, id: usize) -> Option<&WorkItem> {
        self.items.get(id)
    }

    /// `(id, weight)` pairs for the given ids, in the order given.
    pub fn weighted(&self, ids: &[usize]) -> Vec<(usize, u64)> {
        ids.iter()
            .filter_map(|&id| self.get(id).map(|item| (id, item.weight)))
            .collect()
    }
}
