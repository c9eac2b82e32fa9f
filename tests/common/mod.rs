#![allow(dead_code)]

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use briny_continual::catalog::{Backward, Category, Mode, Model, Parameter};
use briny_continual::gradients::GradientBundle;
use briny_continual::tensors::{Ten64, Tensor};
use briny_continual::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const BN_EPS: f64 = 1e-5;

/// A fresh directory under the system temp dir.
pub fn scratch_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "briny_continual_{tag}_{}_{nanos}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn random(rng: &mut StdRng, shape: &[usize], lo: f64, hi: f64) -> Ten64 {
    let len = shape.iter().product();
    Tensor::new(shape.to_vec(), (0..len).map(|_| rng.random_range(lo..hi)).collect())
}

/// `a [m,k] · b [k,n]`.
fn matmul(a: &[f64], b: &[f64], m: usize, k: usize, n: usize) -> Vec<f64> {
    let mut out = vec![0.0; m * n];
    for i in 0..m {
        for l in 0..k {
            let x = a[i * k + l];
            for j in 0..n {
                out[i * n + j] += x * b[l * n + j];
            }
        }
    }
    out
}

/// `aᵀ · b` for `a [m,k]`, `b [m,n]`.
fn matmul_tn(a: &[f64], b: &[f64], m: usize, k: usize, n: usize) -> Vec<f64> {
    let mut out = vec![0.0; k * n];
    for i in 0..m {
        for l in 0..k {
            let x = a[i * k + l];
            for j in 0..n {
                out[l * n + j] += x * b[i * n + j];
            }
        }
    }
    out
}

/// `a · bᵀ` for `a [m,n]`, `b [k,n]`.
fn matmul_nt(a: &[f64], b: &[f64], m: usize, n: usize, k: usize) -> Vec<f64> {
    let mut out = vec![0.0; m * k];
    for i in 0..m {
        for l in 0..k {
            out[i * k + l] = (0..n).map(|j| a[i * n + j] * b[l * n + j]).sum();
        }
    }
    out
}

fn column_sums(a: &[f64], m: usize, n: usize) -> Vec<f64> {
    let mut out = vec![0.0; n];
    for i in 0..m {
        for j in 0..n {
            out[j] += a[i * n + j];
        }
    }
    out
}

/// linear1 → batch norm (running statistics) → relu → per-task linear head.
#[derive(Debug, Clone)]
pub struct Mlp {
    params: Vec<Parameter>,
    mode: Mode,
    pub input: usize,
    pub hidden: usize,
    pub classes: usize,
    pub heads: usize,
}

impl Mlp {
    pub fn new(seed: u64, input: usize, hidden: usize, classes: usize, heads: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut params = vec![
            Parameter::new("linear1.weight", random(&mut rng, &[input, hidden], -0.5, 0.5)),
            Parameter::new("linear1.bias", random(&mut rng, &[hidden], -0.1, 0.1)),
            Parameter::new("bn1.weight", random(&mut rng, &[hidden], 0.8, 1.2)),
            Parameter::new("bn1.bias", random(&mut rng, &[hidden], -0.1, 0.1)),
            Parameter::new("bn1.running_mean", random(&mut rng, &[hidden], -0.2, 0.2)),
            Parameter::new("bn1.running_var", random(&mut rng, &[hidden], 0.5, 1.5)),
            Parameter::new("bn1.num_batches_tracked", Tensor::new(vec![1], vec![3.0])),
        ];
        for t in 0..heads {
            params.push(Parameter::new(
                format!("head{t}.linear.weight"),
                random(&mut rng, &[hidden, classes], -0.5, 0.5),
            ));
            params.push(Parameter::new(
                format!("head{t}.linear.bias"),
                random(&mut rng, &[classes], -0.1, 0.1),
            ));
        }
        Self {
            params,
            mode: Mode::Train,
            input,
            hidden,
            classes,
            heads,
        }
    }

    pub fn small(seed: u64) -> Self {
        Self::new(seed, 4, 5, 3, 2)
    }

    fn value(&self, name: &str) -> &Ten64 {
        &self.params.iter().find(|p| p.name == name).unwrap().value
    }

    pub fn param(&self, name: &str) -> &Parameter {
        self.params.iter().find(|p| p.name == name).unwrap()
    }

    pub fn param_mut(&mut self, name: &str) -> &mut Parameter {
        self.params.iter_mut().find(|p| p.name == name).unwrap()
    }

    /// A random `[batch, input]` batch and class targets.
    pub fn batch(&self, seed: u64, batch: usize) -> (Ten64, Ten64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let x = random(&mut rng, &[batch, self.input], -1.0, 1.0);
        let y = (0..batch)
            .map(|_| rng.random_range(0..self.classes) as f64)
            .collect();
        (x, Tensor::new(vec![batch], y))
    }
}

impl Model for Mlp {
    fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.params
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn forward(&self, input: &Ten64, task: usize) -> Result<(Ten64, Box<Backward>)> {
        let (b, d, h, c) = (input.shape[0], self.input, self.hidden, self.classes);
        assert_eq!(input.shape, vec![b, d]);
        assert!(task >= 1 && task <= self.heads, "unknown task {task}");
        let w_name = format!("head{}.linear.weight", task - 1);
        let b_name = format!("head{}.linear.bias", task - 1);

        let w1 = self.value("linear1.weight").data.clone();
        let b1 = &self.value("linear1.bias").data;
        let gamma = self.value("bn1.weight").data.clone();
        let beta = &self.value("bn1.bias").data;
        let mean = &self.value("bn1.running_mean").data;
        let var = &self.value("bn1.running_var").data;
        let w2 = self.value(&w_name).data.clone();
        let b2 = &self.value(&b_name).data;

        let inv_std: Vec<f64> = var.iter().map(|v| 1.0 / (v + BN_EPS).sqrt()).collect();
        let mut pre = matmul(&input.data, &w1, b, d, h);
        for i in 0..b {
            for j in 0..h {
                pre[i * h + j] += b1[j];
            }
        }
        let xhat: Vec<f64> = pre
            .iter()
            .enumerate()
            .map(|(k, x)| (x - mean[k % h]) * inv_std[k % h])
            .collect();
        let norm: Vec<f64> = xhat
            .iter()
            .enumerate()
            .map(|(k, x)| x * gamma[k % h] + beta[k % h])
            .collect();
        let act: Vec<f64> = norm.iter().map(|x| x.max(0.0)).collect();
        let mut out = matmul(&act, &w2, b, h, c);
        for i in 0..b {
            for j in 0..c {
                out[i * c + j] += b2[j];
            }
        }

        let x = input.data.clone();
        let back = move |dy: &Ten64| {
            let dy = &dy.data;
            let mut bundle = GradientBundle::new();
            bundle
                .insert(w_name.clone(), Tensor::new(vec![h, c], matmul_tn(&act, dy, b, h, c)))
                .unwrap();
            bundle
                .insert(b_name.clone(), Tensor::new(vec![c], column_sums(dy, b, c)))
                .unwrap();

            let da = matmul_nt(dy, &w2, b, c, h);
            let dn: Vec<f64> = da
                .iter()
                .zip(&norm)
                .map(|(g, n)| if *n > 0.0 { *g } else { 0.0 })
                .collect();
            let dgamma: Vec<f64> = column_sums(
                &dn.iter().zip(&xhat).map(|(g, xh)| g * xh).collect::<Vec<_>>(),
                b,
                h,
            );
            let dbeta = column_sums(&dn, b, h);
            let dpre: Vec<f64> = dn
                .iter()
                .enumerate()
                .map(|(k, g)| g * gamma[k % h] * inv_std[k % h])
                .collect();
            bundle
                .insert("bn1.weight", Tensor::new(vec![h], dgamma))
                .unwrap();
            bundle.insert("bn1.bias", Tensor::new(vec![h], dbeta)).unwrap();
            bundle
                .insert("linear1.weight", Tensor::new(vec![d, h], matmul_tn(&x, &dpre, b, d, h)))
                .unwrap();
            bundle
                .insert("linear1.bias", Tensor::new(vec![h], column_sums(&dpre, b, h)))
                .unwrap();
            bundle
        };

        Ok((Tensor::new(vec![b, c], out), Box::new(back)))
    }
}

/// A model that is nothing but a list of tensors; forward is the identity
/// on a `[batch, 1]` input scaled by the first trainable scalar.
#[derive(Debug, Clone, Default)]
pub struct ParamBag {
    pub params: Vec<Parameter>,
    mode: Mode,
}

impl ParamBag {
    pub fn new(params: Vec<Parameter>) -> Self {
        Self {
            params,
            mode: Mode::Train,
        }
    }

    /// `k` trainable entries of shape `[2, 3]` and `m` statistic entries of shape `[4]`.
    pub fn mixed(k: usize, m: usize) -> Self {
        let mut params = Vec::new();
        for i in 0..k {
            let data = (0..6).map(|j| (i * 6 + j) as f64).collect();
            params.push(Parameter::new(format!("layer{i}.weight"), Tensor::new(vec![2, 3], data)));
            if i < m {
                params.push(Parameter::with_category(
                    format!("layer{i}.stat"),
                    Category::Statistic,
                    Tensor::new(vec![4], vec![-1.0; 4]),
                ));
            }
        }
        for i in k..m {
            params.push(Parameter::with_category(
                format!("extra{i}.stat"),
                Category::Statistic,
                Tensor::new(vec![4], vec![-2.0; 4]),
            ));
        }
        Self::new(params)
    }
}

impl Model for ParamBag {
    fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.params
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn forward(&self, input: &Ten64, _task: usize) -> Result<(Ten64, Box<Backward>)> {
        let first = self
            .params
            .iter()
            .find(|p| p.is_trainable())
            .expect("bag has a trainable entry");
        let scale = first.value.data[0];
        let name = first.name.clone();
        let shape = first.value.shape.clone();
        let x = input.data.clone();
        let out = Tensor::new(input.shape.clone(), x.iter().map(|v| v * scale).collect());
        let back = move |dy: &Ten64| {
            let mut g = Tensor::zeros(shape.clone());
            g.data[0] = dy.data.iter().zip(&x).map(|(a, b)| a * b).sum();
            let mut bundle = GradientBundle::new();
            bundle.insert(name.clone(), g).unwrap();
            bundle
        };
        Ok((out, Box::new(back)))
    }
}
