use crate::error::{ComputeError, Result};
use crate::job::JobOutput;
use crate::shaders;

/// How many leading elements get printed.
pub const PREVIEW_LEN: usize = 10;

/// The workloads the binary knows how to set up and check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Two constant-filled inputs added elementwise.
    Sum { elements: usize, lhs: u32, rhs: u32 },
    /// `0..elements` copied to the output unchanged.
    Copy { elements: usize },
}

impl Scenario {
    pub fn sum() -> Self {
        Scenario::Sum {
            elements: 1_000_000,
            lhs: 3,
            rhs: 5,
        }
    }

    pub fn copy() -> Self {
        Scenario::Copy { elements: 10 }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sum" => Some(Self::sum()),
            "copy" => Some(Self::copy()),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::Sum { .. } => "sum",
            Scenario::Copy { .. } => "copy",
        }
    }

    pub fn elements(&self) -> usize {
        match *self {
            Scenario::Sum { elements, .. } | Scenario::Copy { elements } => elements,
        }
    }

    pub fn with_elements(self, n: usize) -> Self {
        match self {
            Scenario::Sum { lhs, rhs, .. } => Scenario::Sum { elements: n, lhs, rhs },
            Scenario::Copy { .. } => Scenario::Copy { elements: n },
        }
    }

    /// The bundled kernel for this workload.
    pub fn shader(&self) -> &'static [u8] {
        match self {
            Scenario::Sum { .. } => shaders::SUM_SPV,
            Scenario::Copy { .. } => shaders::COPY_SPV,
        }
    }

    pub fn inputs(&self) -> Vec<Vec<u32>> {
        match *self {
            Scenario::Sum { elements, lhs, rhs } => vec![vec![lhs; elements], vec![rhs; elements]],
            Scenario::Copy { elements } => vec![(0..elements as u32).collect()],
        }
    }

    pub fn expected_output(&self) -> Vec<u32> {
        match *self {
            Scenario::Sum { elements, lhs, rhs } => vec![lhs.wrapping_add(rhs); elements],
            Scenario::Copy { elements } => (0..elements as u32).collect(),
        }
    }

    /// Compares the output buffer against [`Self::expected_output`] and
    /// reports the first differing element.
    pub fn verify(&self, output: &JobOutput<u32>) -> Result<()> {
        check_output(&self.expected_output(), output.output())
    }
}

fn check_output(expected: &[u32], actual: &[u32]) -> Result<()> {
    if expected.len() != actual.len() {
        return Err(ComputeError::LengthMismatch {
            expected: expected.len(),
            actual: actual.len(),
        });
    }
    match expected.iter().zip(actual).position(|(e, a)| e != a) {
        Some(index) => Err(ComputeError::Mismatch {
            index,
            expected: expected[index].to_string(),
            actual: actual[index].to_string(),
        }),
        None => Ok(()),
    }
}

/// `[a, b, c, ...]` over the first [`PREVIEW_LEN`] elements.
pub fn preview(values: &[u32]) -> String {
    let shown: Vec<String> = values.iter().take(PREVIEW_LEN).map(u32::to_string).collect();
    let more = if values.len() > PREVIEW_LEN { ", ..." } else { "" };
    format!("[{}{}]", shown.join(", "), more)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn output(buffers: Vec<Vec<u32>>) -> JobOutput<u32> {
        JobOutput {
            buffers,
            groups: crate::vulkan::WorkgroupCount::new(1, 1, 1),
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn test_sum_defaults() {
        let scenario = Scenario::sum();
        assert_eq!(scenario.elements(), 1_000_000);
        let inputs = scenario.inputs();
        assert_eq!(inputs.len(), 2);
        assert!(inputs[0].iter().all(|&v| v == 3));
        assert!(inputs[1].iter().all(|&v| v == 5));
        assert_eq!(&scenario.expected_output()[..10], &[8; 10]);
    }

    #[test]
    fn test_copy_defaults() {
        let scenario = Scenario::copy();
        assert_eq!(scenario.inputs(), vec![(0..10).collect::<Vec<u32>>()]);
        assert_eq!(scenario.expected_output(), (0..10).collect::<Vec<u32>>());
    }

    #[test]
    fn test_verify_reports_first_difference() {
        let scenario = Scenario::Copy { elements: 4 };
        assert!(scenario.verify(&output(vec![vec![0, 1, 2, 3], vec![0, 1, 2, 3]])).is_ok());

        let err = scenario
            .verify(&output(vec![vec![0, 1, 2, 3], vec![0, 1, 9, 3]]))
            .unwrap_err();
        assert_eq!(err.to_string(), "element 2: expected 2, got 9");
    }

    #[test]
    fn test_verify_rejects_short_output() {
        let scenario = Scenario::Sum { elements: 3, lhs: 1, rhs: 1 };
        assert!(matches!(
            scenario.verify(&output(vec![vec![2, 2]])),
            Err(ComputeError::LengthMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_names_round_trip() {
        for scenario in [Scenario::sum(), Scenario::copy()] {
            assert_eq!(Scenario::from_name(scenario.name()), Some(scenario));
        }
        assert_eq!(Scenario::from_name("square"), None);
    }

    #[test]
    fn test_with_elements_keeps_operands() {
        assert_eq!(
            Scenario::sum().with_elements(16),
            Scenario::Sum { elements: 16, lhs: 3, rhs: 5 }
        );
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview(&[1, 2, 3]), "[1, 2, 3]");
        assert_eq!(preview(&[8; 12]), "[8, 8, 8, 8, 8, 8, 8, 8, 8, 8, ...]");
    }
}
