//! 多クラス分類の評価指標

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dataset::DataTable;
use crate::error::{Error, Result};

/// log-loss 計算時の確率の下限
const PROBABILITY_EPSILON: f64 = 1e-15;

/// 混同行列（行: 正解, 列: 予測）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub class_names: Vec<String>,
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(class_names: Vec<String>) -> Self {
        let n = class_names.len();
        Self {
            class_names,
            counts: vec![vec![0; n]; n],
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.num_classes()).map(|i| self.counts[i][i]).sum()
    }

    fn row_sum(&self, class: usize) -> usize {
        self.counts[class].iter().sum()
    }

    fn column_sum(&self, class: usize) -> usize {
        self.counts.iter().map(|row| row[class]).sum()
    }

    /// クラスごとの適合率（予測が0件のクラスは0）
    pub fn precision(&self, class: usize) -> f64 {
        ratio(self.counts[class][class], self.column_sum(class))
    }

    /// クラスごとの再現率（正解が0件のクラスは0）
    pub fn recall(&self, class: usize) -> f64 {
        ratio(self.counts[class][class], self.row_sum(class))
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name_width = self
            .class_names
            .iter()
            .map(|n| n.chars().count())
            .chain(["PREDICTED".len(), "Precision".len()])
            .max()
            .unwrap_or(0);
        let cell_width = self
            .class_names
            .iter()
            .map(|n| n.chars().count())
            .chain(self.counts.iter().flatten().map(|c| c.to_string().len()))
            .chain([6])
            .max()
            .unwrap_or(6);

        writeln!(f, "Confusion table")?;
        write!(f, "{:>name_width$} |", "PREDICTED")?;
        for name in &self.class_names {
            write!(f, " {name:>cell_width$} |")?;
        }
        writeln!(f, " Recall")?;

        let rule_len = name_width + 2 + (cell_width + 3) * self.num_classes() + 7;
        writeln!(f, "{}", "=".repeat(rule_len))?;

        for (i, name) in self.class_names.iter().enumerate() {
            write!(f, "{name:>name_width$} |")?;
            for count in &self.counts[i] {
                write!(f, " {count:>cell_width$} |")?;
            }
            writeln!(f, " {:.4}", self.recall(i))?;
        }

        writeln!(f, "{}", "=".repeat(rule_len))?;
        write!(f, "{:>name_width$} |", "Precision")?;
        for i in 0..self.num_classes() {
            write!(f, " {:>cell_width$.4} |", self.precision(i))?;
        }
        writeln!(f)
    }
}

/// 評価結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MulticlassMetrics {
    /// クラスごとの再現率の平均（テストに出現したクラスのみ）
    pub macro_accuracy: f64,
    /// 全体の正解率
    pub micro_accuracy: f64,
    /// スコア列がある場合の平均 log-loss
    pub log_loss: Option<f64>,
    pub confusion_matrix: ConfusionMatrix,
}

impl MulticlassMetrics {
    /// コンソール向けレポート
    pub fn report(&self) -> String {
        let mut out = String::new();
        out.push_str("************************************************************\n");
        out.push_str("*    Metrics for multi-class classification model\n");
        out.push_str("*-----------------------------------------------------------\n");
        out.push_str(&format!("    MacroAccuracy = {:.4}\n", self.macro_accuracy));
        out.push_str(&format!("    MicroAccuracy = {:.4}\n", self.micro_accuracy));
        if let Some(log_loss) = self.log_loss {
            out.push_str(&format!("    LogLoss = {log_loss:.4}\n"));
        }
        out.push_str("************************************************************\n\n");
        out.push_str(&self.confusion_matrix.to_string());
        out
    }

    /// クラスごとの集計をCSVに書き出す
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let matrix = &self.confusion_matrix;
        let mut writer = csv::Writer::from_path(path)?;

        let mut header = vec!["class".to_string()];
        header.extend(matrix.class_names.iter().map(|n| format!("pred_{n}")));
        header.extend(["support", "precision", "recall"].map(String::from));
        writer.write_record(&header)?;

        for (i, name) in matrix.class_names.iter().enumerate() {
            let mut record = vec![name.clone()];
            record.extend(matrix.counts[i].iter().map(|c| c.to_string()));
            record.push(matrix.row_sum(i).to_string());
            record.push(format!("{:.6}", matrix.precision(i)));
            record.push(format!("{:.6}", matrix.recall(i)));
            writer.write_record(&record)?;
        }

        writer.flush().map_err(|e| Error::io(path, e))?;
        Ok(())
    }
}

/// 正解キー列と予測キー列から評価指標を計算
///
/// `score_column` が存在すれば log-loss も計算します。入力テーブルは変更しません。
pub fn evaluate(
    predictions: &DataTable,
    label_column: &str,
    predicted_column: &str,
    score_column: Option<&str>,
    class_names: &[String],
) -> Result<MulticlassMetrics> {
    let (truth, _) = predictions.key_column(label_column)?;
    let (predicted, _) = predictions.key_column(predicted_column)?;
    if truth.is_empty() {
        return Err(Error::EmptyDataset("評価データに行がありません".to_string()));
    }

    let num_classes = class_names.len() as u32;
    let mut matrix = ConfusionMatrix::new(class_names.to_vec());
    for (&t, &p) in truth.iter().zip(predicted) {
        for key in [t, p] {
            if key >= num_classes {
                return Err(Error::KeyOutOfRange {
                    key,
                    cardinality: num_classes,
                });
            }
        }
        matrix.counts[t as usize][p as usize] += 1;
    }

    let micro_accuracy = ratio(matrix.correct(), matrix.total());

    let present: Vec<usize> = (0..matrix.num_classes())
        .filter(|&i| matrix.row_sum(i) > 0)
        .collect();
    let macro_accuracy =
        present.iter().map(|&i| matrix.recall(i)).sum::<f64>() / present.len() as f64;

    let log_loss = match score_column {
        Some(name) if predictions.has_column(name) => {
            let scores = predictions.scores_column(name)?;
            let total: f64 = truth
                .iter()
                .zip(scores)
                .map(|(&t, row)| {
                    let p = row.get(t as usize).copied().unwrap_or(0.0) as f64;
                    -p.max(PROBABILITY_EPSILON).ln()
                })
                .sum();
            Some(total / truth.len() as f64)
        }
        _ => None,
    };

    Ok(MulticlassMetrics {
        macro_accuracy,
        micro_accuracy,
        log_loss,
        confusion_matrix: matrix,
    })
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
