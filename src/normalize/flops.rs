//! Floating point operation estimates for common operators.
//!
//! Estimates are computed from the extra arguments saved with the span.
//! Missing or malformed arguments give 0 and a warning, never an error.

use crate::record::{ExtraArg, ExtraArgs};
use log::warn;

const GEMM_MULTIPLY_FACTOR: i64 = 2;
const CONV2D_MULTIPLY_FACTOR: i64 = 2;

fn int_list<'a>(args: &'a ExtraArgs, key: &str) -> Option<&'a [i64]> {
    match args.get(key) {
        Some(ExtraArg::IntList(values)) => Some(values.as_slice()),
        _ => None,
    }
}

fn int(args: &ExtraArgs, key: &str) -> Option<i64> {
    match args.get(key) {
        Some(ExtraArg::Int(value)) => Some(*value),
        _ => None,
    }
}

/// Product of `dims` with negative dims counted as 0, `None` on overflow
fn checked_product(dims: &[i64]) -> Option<u64> {
    dims.iter()
        .try_fold(1u64, |acc, d| acc.checked_mul((*d).max(0) as u64))
}

/// Fold an overflowing estimate into 0
fn estimate(op_name: &str, dims: &[i64]) -> u64 {
    checked_product(dims).unwrap_or_else(|| {
        warn!("Flop estimate for {} overflows with dims {:?}", op_name, dims);
        0
    })
}

/// Estimated flops for `op_name`, or 0 when the operator is unknown
pub fn compute_flops(op_name: &str, args: &ExtraArgs) -> u64 {
    let short_name = op_name.rsplit("::").next().unwrap_or(op_name);

    match short_name {
        "conv2d" => conv2d_flops(op_name, args),
        "mm" | "addmm" | "matmul" => gemm_flops(op_name, args),
        "bmm" | "baddbmm" => batched_gemm_flops(op_name, args),
        "mul" | "add" => match int_list(args, "mat_size") {
            Some(size) => estimate(op_name, size),
            None => {
                warn!("Calculating flops for {} requires mat_size in saved arguments.", op_name);
                0
            }
        },
        _ => {
            warn!("No flop formula for {}; estimating 0", op_name);
            0
        }
    }
}

fn gemm_flops(op_name: &str, args: &ExtraArgs) -> u64 {
    let (Some(mat1), Some(mat2)) = (int_list(args, "mat1_size"), int_list(args, "mat2_size")) else {
        warn!("Calculating flops for {} requires mat1_size and mat2_size in saved arguments.", op_name);
        return 0;
    };
    if mat1.len() != 2 || mat2.len() != 2 {
        warn!("Flop estimation for {} expects 2D inputs, got {:?} and {:?}", op_name, mat1, mat2);
        return 0;
    }

    let (m, k, n) = (mat1[0], mat1[1], mat2[1]);
    if k <= 0 {
        return 0;
    }

    estimate(op_name, &[GEMM_MULTIPLY_FACTOR, m, k, n])
}

fn batched_gemm_flops(op_name: &str, args: &ExtraArgs) -> u64 {
    let (Some(mat1), Some(mat2)) = (int_list(args, "mat1_size"), int_list(args, "mat2_size")) else {
        warn!("Calculating flops for {} requires mat1_size and mat2_size in saved arguments.", op_name);
        return 0;
    };
    if mat1.len() != 3 || mat2.len() != 3 {
        warn!("Flop estimation for {} expects 3D inputs, got {:?} and {:?}", op_name, mat1, mat2);
        return 0;
    }
    if mat1[0] != mat2[0] {
        warn!("Batch sizes of {} inputs differ: {} vs {}", op_name, mat1[0], mat2[0]);
        return 0;
    }

    let (batch, m, k, n) = (mat1[0], mat1[1], mat1[2], mat2[2]);
    estimate(op_name, &[GEMM_MULTIPLY_FACTOR, batch, m, n, k])
}

/// `(input + 2 * padding - dilation * (kernel - 1) - 1) / stride + 1`
fn conv_output_dim(input: i64, padding: i64, dilation: i64, kernel: i64, stride: i64) -> Option<i64> {
    let span = dilation.checked_mul(kernel.checked_sub(1)?)?;
    let padded = input.checked_add(padding.checked_mul(2)?)?;
    Some(padded.checked_sub(span)?.checked_sub(1)? / stride + 1)
}

fn conv2d_flops(op_name: &str, args: &ExtraArgs) -> u64 {
    let (Some(input), Some(weight), Some(stride), Some(padding), Some(dilation), Some(groups)) = (
        int_list(args, "input_size"),
        int_list(args, "weight_size"),
        int_list(args, "stride"),
        int_list(args, "padding"),
        int_list(args, "dilation"),
        int(args, "groups"),
    ) else {
        warn!("Calculating flops for conv2d requires groups, padding, stride, dilation, input_size, and weight_size in saved arguments.");
        return 0;
    };
    if input.len() != 4 || weight.len() != 4 {
        warn!("Flop estimation for conv2d expects 4D input and weight");
        return 0;
    }
    if stride.len() != 2 || padding.len() != 2 || dilation.len() != 2 {
        warn!("Flop estimation for conv2d expects 2D stride, padding and dilation");
        return 0;
    }
    if groups <= 0 || stride.iter().any(|s| *s <= 0) {
        warn!("Flop estimation for conv2d got non-positive groups or stride");
        return 0;
    }

    let (batch, in_channels, input_h, input_w) = (input[0], input[1], input[2], input[3]);
    let (out_channels, kernel_h, kernel_w) = (weight[0], weight[2], weight[3]);

    let (Some(output_h), Some(output_w)) = (
        conv_output_dim(input_h, padding[0], dilation[0], kernel_h, stride[0]),
        conv_output_dim(input_w, padding[1], dilation[1], kernel_w, stride[1]),
    ) else {
        warn!("Flop estimate for {} overflows computing the output size", op_name);
        return 0;
    };

    estimate(
        op_name,
        &[
            CONV2D_MULTIPLY_FACTOR,
            batch,
            output_h,
            output_w,
            kernel_h,
            kernel_w,
            in_channels,
            out_channels,
        ],
    ) / groups as u64
}
