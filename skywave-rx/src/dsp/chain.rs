//! DSP chain runtime.
//!
//! A chain is a linear run of typed stages. Adjacency (output type == input
//! type, output rate == input rate) is verified once at build time, scratch
//! buffers are pre-sized from each stage's own prediction, and every pass
//! records per-stage elapsed time into the caller's metrics point.
//!
//! A chain is owned by exactly one pipeline and processed by one thread at a
//! time; parallelism happens across chains.

use std::time::Instant;

use num_complex::Complex;
use skywave_common::metrics::Point;
use skywave_common::{Error, Result};

use super::Block;

/// Element type flowing between stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    Complex,
    Real,
    Byte,
}

impl std::fmt::Display for SampleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleType::Complex => write!(f, "complex"),
            SampleType::Real => write!(f, "real"),
            SampleType::Byte => write!(f, "byte"),
        }
    }
}

enum StageKind {
    Cc(Box<dyn Block<Complex<f32>, Complex<f32>>>),
    Cf(Box<dyn Block<Complex<f32>, f32>>),
    Ff(Box<dyn Block<f32, f32>>),
    Fb(Box<dyn Block<f32, u8>>),
}

impl StageKind {
    fn input_type(&self) -> SampleType {
        match self {
            StageKind::Cc(_) | StageKind::Cf(_) => SampleType::Complex,
            StageKind::Ff(_) | StageKind::Fb(_) => SampleType::Real,
        }
    }

    fn output_type(&self) -> SampleType {
        match self {
            StageKind::Cc(_) => SampleType::Complex,
            StageKind::Cf(_) | StageKind::Ff(_) => SampleType::Real,
            StageKind::Fb(_) => SampleType::Byte,
        }
    }

    fn predict(&self, input_len: usize) -> usize {
        match self {
            StageKind::Cc(b) => b.predict_output_size(input_len),
            StageKind::Cf(b) => b.predict_output_size(input_len),
            StageKind::Ff(b) => b.predict_output_size(input_len),
            StageKind::Fb(b) => b.predict_output_size(input_len),
        }
    }
}

/// Per-stage scratch output, allocated at build time and reused.
#[derive(Default)]
struct Scratch {
    complex: Vec<Complex<f32>>,
    real: Vec<f32>,
    bytes: Vec<u8>,
}

struct Stage {
    name: &'static str,
    input_rate: u32,
    output_rate: u32,
    kind: StageKind,
    scratch: Scratch,
    produced: usize,
}

/// Borrowed view of a stage's latest output.
enum Data<'a> {
    C(&'a [Complex<f32>]),
    F(&'a [f32]),
    B(&'a [u8]),
}

/// Builder accumulating typed stages in order.
#[derive(Default)]
pub struct ChainBuilder {
    stages: Vec<Stage>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, name: &'static str, input_rate: u32, output_rate: u32, kind: StageKind) -> Self {
        self.stages.push(Stage {
            name,
            input_rate,
            output_rate,
            kind,
            scratch: Scratch::default(),
            produced: 0,
        });
        self
    }

    /// complex -> complex
    pub fn cc(
        self,
        name: &'static str,
        input_rate: u32,
        output_rate: u32,
        block: impl Block<Complex<f32>, Complex<f32>> + 'static,
    ) -> Self {
        self.push(name, input_rate, output_rate, StageKind::Cc(Box::new(block)))
    }

    /// complex -> real
    pub fn cf(
        self,
        name: &'static str,
        input_rate: u32,
        output_rate: u32,
        block: impl Block<Complex<f32>, f32> + 'static,
    ) -> Self {
        self.push(name, input_rate, output_rate, StageKind::Cf(Box::new(block)))
    }

    /// real -> real
    pub fn ff(
        self,
        name: &'static str,
        input_rate: u32,
        output_rate: u32,
        block: impl Block<f32, f32> + 'static,
    ) -> Self {
        self.push(name, input_rate, output_rate, StageKind::Ff(Box::new(block)))
    }

    /// real -> byte (one symbol per byte)
    pub fn fb(
        self,
        name: &'static str,
        input_rate: u32,
        output_rate: u32,
        block: impl Block<f32, u8> + 'static,
    ) -> Self {
        self.push(name, input_rate, output_rate, StageKind::Fb(Box::new(block)))
    }

    /// Verify adjacency and pre-size scratch buffers for the given expected
    /// input length. Violations are refused here, never at run time.
    pub fn build(self, expected_input_len: usize, output_type: SampleType) -> Result<Chain> {
        let mut stages = self.stages;
        if stages.len() < 2 {
            return Err(Error::ChainConfig(
                "a chain needs at least two stages".into(),
            ));
        }
        if stages[0].kind.input_type() != SampleType::Complex {
            return Err(Error::ChainConfig(format!(
                "first stage {} must consume complex samples",
                stages[0].name
            )));
        }
        for pair in stages.windows(2) {
            let (cur, next) = (&pair[0], &pair[1]);
            if cur.kind.output_type() != next.kind.input_type() {
                return Err(Error::ChainConfig(format!(
                    "{} -> {}: type mismatch ({} != {})",
                    cur.name,
                    next.name,
                    cur.kind.output_type(),
                    next.kind.input_type()
                )));
            }
            if cur.output_rate != next.input_rate {
                return Err(Error::ChainConfig(format!(
                    "{} -> {}: rate mismatch ({} != {})",
                    cur.name, next.name, cur.output_rate, next.input_rate
                )));
            }
        }
        let last = stages.last().expect("checked non-empty");
        if last.kind.output_type() != output_type {
            return Err(Error::ChainConfig(format!(
                "last stage {} produces {}, chain requires {}",
                last.name,
                last.kind.output_type(),
                output_type
            )));
        }

        let mut expected = expected_input_len;
        for stage in &mut stages {
            let predicted = stage.kind.predict(expected);
            let capacity = predicted * 2;
            match stage.kind.output_type() {
                SampleType::Complex => stage.scratch.complex.resize(capacity, Complex::default()),
                SampleType::Real => stage.scratch.real.resize(capacity, 0.0),
                SampleType::Byte => stage.scratch.bytes.resize(capacity, 0),
            }
            expected = predicted;
        }

        Ok(Chain { stages })
    }
}

/// A built, type-checked chain.
pub struct Chain {
    stages: Vec<Stage>,
}

impl Chain {
    /// Run every stage over `input`, recording per-stage timings. The output
    /// stays in the last stage's scratch buffer; read it with
    /// [`symbols`](Self::symbols) or [`real_output`](Self::real_output).
    pub fn process(&mut self, input: &[Complex<f32>], metrics: &mut Point) {
        for i in 0..self.stages.len() {
            let (done, rest) = self.stages.split_at_mut(i);
            let stage = &mut rest[0];

            let data = match done.last() {
                None => Data::C(input),
                Some(prev) => prev.output(),
            };

            // Input lengths can grow past the build-time expectation (a
            // source may deliver a larger segment class); grow once, keep.
            let in_len = match &data {
                Data::C(d) => d.len(),
                Data::F(d) => d.len(),
                Data::B(d) => d.len(),
            };
            let need = stage.kind.predict(in_len);

            let start = Instant::now();
            let produced = match (&mut stage.kind, data) {
                (StageKind::Cc(block), Data::C(x)) => {
                    let buf = &mut stage.scratch.complex;
                    if buf.len() < need {
                        buf.resize(need * 2, Complex::default());
                    }
                    block.work(x, buf)
                }
                (StageKind::Cf(block), Data::C(x)) => {
                    let buf = &mut stage.scratch.real;
                    if buf.len() < need {
                        buf.resize(need * 2, 0.0);
                    }
                    block.work(x, buf)
                }
                (StageKind::Ff(block), Data::F(x)) => {
                    let buf = &mut stage.scratch.real;
                    if buf.len() < need {
                        buf.resize(need * 2, 0.0);
                    }
                    block.work(x, buf)
                }
                (StageKind::Fb(block), Data::F(x)) => {
                    let buf = &mut stage.scratch.bytes;
                    if buf.len() < need {
                        buf.resize(need * 2, 0);
                    }
                    block.work(x, buf)
                }
                // Adjacency was proven at build time.
                _ => unreachable!("stage input type verified at build time"),
            };
            let elapsed = start.elapsed().as_micros() as i64;

            stage.produced = produced;
            metrics.add_field(format!("{}_duration_us", stage.name), elapsed);
        }
    }

    /// Symbol bytes from the final stage of a symbol chain.
    pub fn symbols(&self) -> &[u8] {
        match self.stages.last() {
            Some(stage) if matches!(stage.kind, StageKind::Fb(_)) => {
                &stage.scratch.bytes[..stage.produced]
            }
            _ => &[],
        }
    }

    /// Real samples from the final stage of an audio chain.
    pub fn real_output(&self) -> &[f32] {
        match self.stages.last() {
            Some(stage)
                if matches!(stage.kind, StageKind::Ff(_) | StageKind::Cf(_)) =>
            {
                &stage.scratch.real[..stage.produced]
            }
            _ => &[],
        }
    }

    /// Rate of the final stage's output.
    pub fn output_rate(&self) -> u32 {
        self.stages.last().map(|s| s.output_rate).unwrap_or(0)
    }
}

impl Stage {
    fn output(&self) -> Data<'_> {
        match self.kind.output_type() {
            SampleType::Complex => Data::C(&self.scratch.complex[..self.produced]),
            SampleType::Real => Data::F(&self.scratch.real[..self.produced]),
            SampleType::Byte => Data::B(&self.scratch.bytes[..self.produced]),
        }
    }
}
