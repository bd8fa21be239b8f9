use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Cómo se parte el conjunto de hosts de un componente en tandas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Batch {
    /// Tandas de tamaño fijo.
    Count { count: usize },
    /// Tandas de `ceil(percent/100 * n)` hosts; la última se queda con el resto.
    Percent { percent: u32 },
    /// Una tanda inicial, confirmación manual, y el resto en tandas de
    /// `remaining_percent`.
    Conditional {
        initial_percent: u32,
        remaining_percent: u32,
    },
}

fn percent_of(percent: u32, n: usize) -> usize {
    (percent as usize * n).div_ceil(100).max(1)
}

fn check_percent(name: &str, percent: u32) -> Result<()> {
    if percent == 0 || percent > 100 {
        return Err(Error::InvalidBatch(format!(
            "{} tiene que estar entre 1 y 100, vino {}",
            name, percent
        )));
    }
    Ok(())
}

impl Batch {
    pub fn validate(&self) -> Result<()> {
        match self {
            Batch::Count { count } if *count == 0 => {
                Err(Error::InvalidBatch("count tiene que ser mayor a 0".into()))
            }
            Batch::Count { .. } => Ok(()),
            Batch::Percent { percent } => check_percent("percent", *percent),
            Batch::Conditional {
                initial_percent,
                remaining_percent,
            } => {
                check_percent("initial_percent", *initial_percent)?;
                check_percent("remaining_percent", *remaining_percent)
            }
        }
    }

    /// Tamaño de la primera tanda para `n` hosts.
    pub fn initial_batch_size(&self, n: usize) -> usize {
        let size = match self {
            Batch::Count { count } => *count,
            Batch::Percent { percent } => percent_of(*percent, n),
            Batch::Conditional {
                initial_percent, ..
            } => percent_of(*initial_percent, n),
        };
        size.min(n)
    }

    /// Entre la primera tanda y las siguientes hay que pedir confirmación.
    pub fn requires_confirmation(&self) -> bool {
        matches!(self, Batch::Conditional { .. })
    }

    pub fn split(&self, hosts: &[String]) -> Result<Vec<Vec<String>>> {
        self.validate()?;
        if hosts.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = |items: &[String], size: usize| -> Vec<Vec<String>> {
            items.chunks(size).map(|c| c.to_vec()).collect()
        };

        let groups = match self {
            Batch::Count { count } => chunks(hosts, *count),
            Batch::Percent { percent } => chunks(hosts, percent_of(*percent, hosts.len())),
            Batch::Conditional {
                remaining_percent, ..
            } => {
                let (initial, rest) = hosts.split_at(self.initial_batch_size(hosts.len()));
                let mut groups = vec![initial.to_vec()];
                if !rest.is_empty() {
                    groups.extend(chunks(rest, percent_of(*remaining_percent, rest.len())));
                }
                groups
            }
        };
        Ok(groups)
    }
}
