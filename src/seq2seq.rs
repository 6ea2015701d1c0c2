//! Sequence to sequence building blocks
//!
//! The decoder is unrolled twice over the same variables: a training pass fed with
//! the ground truth (teacher forcing) and a sampling pass fed with its own previous
//! output, usable when no targets are available.

use crate::{
    graph::{BuildContext, DType, DimRef, GraphError, Tensor, ops},
    rnn::{RnnCell, State, static_rnn},
};

/// Training and sampling unrollings of a decoder. Both state lists start with the
/// initial state, so they are one longer than the output lists.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub outputs: Vec<Tensor>,
    pub states: Vec<State>,
    pub sampling_outputs: Vec<Tensor>,
    pub sampling_states: Vec<State>,
}

/// Splits `x` (`[batch, input_length, dim]`) into encoder inputs and `y`
/// (`[batch, output_length, dim]`) into decoder inputs and targets.
///
/// The decoder reads `sentinel` first and is expected to emit it last, so both
/// decoder sequences have `output_length + 1` steps. Without a sentinel a zero
/// tensor is used, sized like one step of `y` but with the batch size of `x`,
/// since `y` is not fed when sampling.
pub fn seq2seq_inputs(
    ctx: &mut BuildContext,
    x: &Tensor,
    y: &Tensor,
    input_length: usize,
    output_length: usize,
    sentinel: Option<Tensor>,
) -> Result<(Vec<Tensor>, Vec<Tensor>, Vec<Tensor>), GraphError> {
    if x.rank() != 3 || y.rank() != 3 {
        return Err(GraphError::shape(
            "seq2seq_inputs",
            format!("expected [batch, length, dim] inputs, got {} and {}", x.shape(), y.shape()),
        ));
    }
    if output_length == 0 {
        return Err(GraphError::shape("seq2seq_inputs", "output_length must be positive"));
    }
    ctx.name_scope("seq2seq_inputs", |ctx| {
        let encoder_inputs = ops::split_squeeze(ctx, 1, input_length, x)?;
        let ys = ops::split_squeeze(ctx, 1, output_length, y)?;
        let sentinel = match sentinel {
            Some(sentinel) => sentinel,
            None => {
                let feature_dim = ys[0].dim(1).and_then(|d| d.known()).ok_or_else(|| {
                    GraphError::shape(
                        "seq2seq_inputs",
                        format!("cannot infer a sentinel from output step shape {}", ys[0].shape()),
                    )
                })?;
                ops::zeros(ctx, &[DimRef::RuntimeOf(x, 0), DimRef::Static(feature_dim)])?
            }
        };

        let mut decoder_inputs = Vec::with_capacity(output_length + 1);
        decoder_inputs.push(sentinel.clone());
        decoder_inputs.extend(ys.iter().cloned());
        let mut decoder_targets = ys;
        decoder_targets.push(sentinel);
        Ok((encoder_inputs, decoder_inputs, decoder_targets))
    })
}

/// Unrolls `cell` over `decoder_inputs` from `initial_state` in variable scope
/// `rnn_decoder`, then unrolls it again feeding back its own outputs.
///
/// Both passes share one set of variables. The sampling pass takes the training
/// output of step 0 as its own and continues from the initial state, so its step
/// 1 reads that output with the state step 0 started from.
pub fn rnn_decoder(
    ctx: &mut BuildContext,
    decoder_inputs: &[Tensor],
    initial_state: State,
    cell: &dyn RnnCell,
) -> Result<Decoded, GraphError> {
    if decoder_inputs.is_empty() {
        return Err(GraphError::shape("rnn_decoder", "no decoder inputs"));
    }
    ctx.variable_scope("rnn_decoder", |ctx| {
        let mut states = vec![initial_state.clone()];
        let mut outputs = Vec::with_capacity(decoder_inputs.len());
        ctx.name_scope("training", |ctx| -> Result<(), GraphError> {
            for (i, input) in decoder_inputs.iter().enumerate() {
                if i > 0 {
                    ctx.reuse_variables();
                }
                let (output, state) = cell.step(ctx, input, &states[i])?;
                outputs.push(output);
                states.push(state);
            }
            Ok(())
        })?;

        let mut sampling_states = vec![initial_state];
        let mut sampling_outputs = Vec::with_capacity(decoder_inputs.len());
        ctx.name_scope("sampling", |ctx| -> Result<(), GraphError> {
            sampling_outputs.push(outputs[0].clone());
            sampling_states.push(states[0].clone());
            for i in 1..decoder_inputs.len() {
                let (output, state) = cell.step(ctx, &sampling_outputs[i - 1], &sampling_states[i])?;
                sampling_outputs.push(output);
                sampling_states.push(state);
            }
            Ok(())
        })?;
        log::debug!(
            "rnn_decoder unrolled {} steps in {}",
            decoder_inputs.len(),
            ctx.scope_path()
        );

        Ok(Decoded {
            outputs,
            states,
            sampling_outputs,
            sampling_states,
        })
    })
}

/// Encodes `encoder_inputs` with `encoder_cell` and decodes `decoder_inputs` from
/// the final encoder state. The decoder uses `encoder_cell` when no
/// `decoder_cell` is given.
pub fn rnn_seq2seq(
    ctx: &mut BuildContext,
    encoder_inputs: &[Tensor],
    decoder_inputs: &[Tensor],
    encoder_cell: &dyn RnnCell,
    decoder_cell: Option<&dyn RnnCell>,
    dtype: DType,
) -> Result<Decoded, GraphError> {
    ctx.variable_scope("rnn_seq2seq", |ctx| {
        let (_, last_state) = static_rnn(ctx, encoder_cell, encoder_inputs, None, dtype)?;
        rnn_decoder(ctx, decoder_inputs, last_state, decoder_cell.unwrap_or(encoder_cell))
    })
}

/// Summed softmax cross entropy of `decoding` against `labels` over every step
/// and example, and the per-step class probabilities side by side,
/// `[batch, steps * classes]`.
///
/// Probabilities come from `sampling_decoding` when given. The loss is always
/// computed from `decoding`.
pub fn sequence_classifier(
    ctx: &mut BuildContext,
    decoding: &[Tensor],
    labels: &[Tensor],
    sampling_decoding: Option<&[Tensor]>,
) -> Result<(Tensor, Tensor), GraphError> {
    if decoding.is_empty() || decoding.len() != labels.len() {
        return Err(GraphError::shape(
            "sequence_classifier",
            format!("{} predictions for {} labels", decoding.len(), labels.len()),
        ));
    }
    if let Some(sampling) = sampling_decoding {
        if sampling.len() != decoding.len() {
            return Err(GraphError::shape(
                "sequence_classifier",
                format!("{} sampling predictions for {} steps", sampling.len(), decoding.len()),
            ));
        }
    }
    ctx.name_scope("sequence_classifier", |ctx| {
        let mut xents = Vec::with_capacity(decoding.len());
        let mut predictions = Vec::with_capacity(decoding.len());
        for (i, (pred, label)) in decoding.iter().zip(labels).enumerate() {
            xents.push(ops::softmax_cross_entropy(ctx, pred, label)?);
            let source = sampling_decoding.map_or(pred, |s| &s[i]);
            predictions.push(ops::softmax(ctx, source)?);
        }
        let xent = ops::add_n(ctx, &xents)?;
        let loss = ops::reduce_sum(ctx, &xent);
        let predictions = ops::concat(ctx, 1, &predictions)?;
        Ok((predictions, loss))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assert_eq_float,
        graph::{Dim, Graph, HostTensor, Session, Shape},
        rnn::{BasicRnnCell, GruCell, LstmCell},
    };

    fn sequence_placeholder(ctx: &mut BuildContext, name: &str, length: usize, dim: usize) -> Tensor {
        ops::placeholder(
            ctx,
            name,
            Shape::new(vec![Dim::Dynamic, Dim::Known(length), Dim::Known(dim)]),
        )
    }

    #[test]
    fn test_seq2seq_inputs_lengths() {
        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 0);
        let x = sequence_placeholder(&mut ctx, "x", 5, 4);
        let y = sequence_placeholder(&mut ctx, "y", 3, 4);
        let (enc, dec_in, dec_out) = seq2seq_inputs(&mut ctx, &x, &y, 5, 3, None).unwrap();
        assert_eq!(enc.len(), 5);
        assert_eq!(dec_in.len(), 4);
        assert_eq!(dec_out.len(), 4);
        let step = Shape::new(vec![Dim::Dynamic, Dim::Known(4)]);
        assert!(enc.iter().chain(&dec_in).chain(&dec_out).all(|t| t.shape() == &step));
        // the sentinel opens the inputs and closes the targets
        assert_eq!(dec_in[0], dec_out[3]);
        assert_eq!(dec_in[1..], dec_out[..3]);
    }

    #[test]
    fn test_seq2seq_inputs_shape_errors() {
        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 0);
        let x = sequence_placeholder(&mut ctx, "x", 5, 4);
        let y = sequence_placeholder(&mut ctx, "y", 3, 4);
        assert!(matches!(
            seq2seq_inputs(&mut ctx, &x, &y, 4, 3, None),
            Err(GraphError::Shape { .. })
        ));
        let flat = ops::placeholder(&mut ctx, "flat", Shape::new(vec![Dim::Dynamic, Dim::Known(3)]));
        assert!(seq2seq_inputs(&mut ctx, &x, &flat, 5, 3, None).is_err());
        let unknown = ops::placeholder(
            &mut ctx,
            "unknown",
            Shape::new(vec![Dim::Dynamic, Dim::Known(3), Dim::Dynamic]),
        );
        assert!(seq2seq_inputs(&mut ctx, &x, &unknown, 5, 3, None).is_err());
    }

    #[test]
    fn test_sentinel_batch_comes_from_x() {
        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 0);
        let x = sequence_placeholder(&mut ctx, "x", 2, 4);
        let y = sequence_placeholder(&mut ctx, "y", 3, 4);
        let (_, dec_in, _) = seq2seq_inputs(&mut ctx, &x, &y, 2, 3, None).unwrap();

        // only x is fed, as when sampling
        let session = Session::new(&graph);
        let input = HostTensor::new(vec![1.0; 7 * 2 * 4], &[7, 2, 4]).unwrap();
        let out = session.run(&[&dec_in[0]], &[(&x, &input)]).unwrap();
        assert_eq!(out[0].shape(), &[7, 4]);
        assert!(out[0].data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_explicit_sentinel_is_used() {
        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 0);
        let x = sequence_placeholder(&mut ctx, "x", 2, 2);
        let y = sequence_placeholder(&mut ctx, "y", 2, 2);
        let go = ops::constant(&mut ctx, vec![1.0, -1.0], &[1, 2]).unwrap();
        let (_, dec_in, dec_out) = seq2seq_inputs(&mut ctx, &x, &y, 2, 2, Some(go.clone())).unwrap();
        assert_eq!(dec_in[0], go);
        assert_eq!(dec_out[2], go);
    }

    #[test]
    fn test_rnn_decoder_shares_weights() {
        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 0);
        let x = sequence_placeholder(&mut ctx, "x", 4, 3);
        let inputs = ops::split_squeeze(&mut ctx, 1, 4, &x).unwrap();
        let cell = GruCell::new(3);
        let initial = cell.zero_state(&mut ctx, &inputs[0], DType::F32).unwrap();
        let decoded = rnn_decoder(&mut ctx, &inputs, initial, &cell).unwrap();

        assert_eq!(decoded.outputs.len(), 4);
        assert_eq!(decoded.sampling_outputs.len(), 4);
        assert_eq!(decoded.states.len(), 5);
        assert_eq!(decoded.sampling_states.len(), 5);
        // four training steps and three sampling steps, one cell's worth of variables
        assert_eq!(graph.variables().len(), 6);
        assert!(
            graph
                .variables()
                .iter()
                .all(|v| v.name.starts_with("rnn_decoder/gru_cell/"))
        );
    }

    #[test]
    fn test_sampling_coincides_with_training_at_step_zero() {
        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 0);
        let x = sequence_placeholder(&mut ctx, "x", 3, 2);
        let inputs = ops::split_squeeze(&mut ctx, 1, 3, &x).unwrap();
        let cell = LstmCell::new(2);
        let initial = cell.zero_state(&mut ctx, &inputs[0], DType::F32).unwrap();
        let decoded = rnn_decoder(&mut ctx, &inputs, initial, &cell).unwrap();

        assert_eq!(decoded.sampling_outputs[0], decoded.outputs[0]);
        assert_eq!(decoded.sampling_states[0], decoded.states[0]);
        // step 1 of the sampling pass starts again from the initial state
        assert_eq!(decoded.sampling_states[1], decoded.states[0]);
        assert_ne!(decoded.sampling_states[1], decoded.states[1]);
        // later steps are fed back outputs, not the ground truth
        assert_ne!(decoded.sampling_outputs[1], decoded.outputs[1]);

        let session = Session::new(&graph);
        let input = HostTensor::new((0..12).map(|v| v as f32 * 0.25).collect(), &[2, 3, 2]).unwrap();
        let out = session
            .run(
                &[&decoded.outputs[0], &decoded.sampling_outputs[0]],
                &[(&x, &input)],
            )
            .unwrap();
        assert_eq!(out[0], out[1]);
    }

    #[test]
    fn test_rnn_seq2seq() {
        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 0);
        let x = sequence_placeholder(&mut ctx, "x", 3, 2);
        let y = sequence_placeholder(&mut ctx, "y", 2, 2);
        let (enc, dec_in, _) = seq2seq_inputs(&mut ctx, &x, &y, 3, 2, None).unwrap();
        let encoder = BasicRnnCell::new(2);
        let decoder = BasicRnnCell::new(2);
        let decoded =
            rnn_seq2seq(&mut ctx, &enc, &dec_in, &encoder, Some(&decoder), DType::F32).unwrap();
        assert_eq!(decoded.outputs.len(), 3);
        assert!(graph.variable("rnn_seq2seq/rnn/basic_rnn_cell/kernel").is_some());
        assert!(
            graph
                .variable("rnn_seq2seq/rnn_decoder/basic_rnn_cell/kernel")
                .is_some()
        );
        assert_eq!(graph.variables().len(), 4);

        // the sampling path only needs x
        let session = Session::new(&graph);
        let input = HostTensor::new(vec![0.5; 2 * 3 * 2], &[2, 3, 2]).unwrap();
        let out = session
            .run(&[decoded.sampling_outputs.last().unwrap()], &[(&x, &input)])
            .unwrap();
        assert_eq!(out[0].shape(), &[2, 2]);
    }

    #[test]
    fn test_sequence_classifier_loss() {
        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 0);
        let logits = ops::constant(&mut ctx, vec![2.0, 1.0, 0.1], &[1, 3]).unwrap();
        let label = ops::constant(&mut ctx, vec![1.0, 0.0, 0.0], &[1, 3]).unwrap();
        let (predictions, loss) = sequence_classifier(&mut ctx, &[logits], &[label], None).unwrap();
        assert_eq!(loss.shape(), &Shape::scalar());

        let session = Session::new(&graph);
        let out = session.run(&[&loss, &predictions], &[]).unwrap();
        assert_eq_float!(out[0].data()[0], 0.41703);
        assert_eq!(out[1].shape(), &[1, 3]);
    }

    #[test]
    fn test_sequence_classifier_predictions() {
        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 0);
        let a = ops::constant(&mut ctx, vec![0.5, 1.5, -1.0], &[1, 3]).unwrap();
        let b = ops::constant(&mut ctx, vec![3.0, 0.0, 0.0], &[1, 3]).unwrap();
        let la = ops::constant(&mut ctx, vec![0.0, 1.0, 0.0], &[1, 3]).unwrap();
        let lb = ops::constant(&mut ctx, vec![1.0, 0.0, 0.0], &[1, 3]).unwrap();
        let (predictions, _) = sequence_classifier(&mut ctx, &[a, b], &[la, lb], None).unwrap();
        assert_eq!(predictions.shape(), &Shape::known(&[1, 6]));

        let session = Session::new(&graph);
        let out = session.run(&[&predictions], &[]).unwrap();
        let probs = out[0].data();
        assert_eq_float!(probs[..3].iter().sum::<f32>(), 1.0);
        assert_eq_float!(probs[3..].iter().sum::<f32>(), 1.0);
    }

    #[test]
    fn test_sequence_classifier_sampling_substitution() {
        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 0);
        let logits = ops::constant(&mut ctx, vec![2.0, 1.0, 0.1], &[1, 3]).unwrap();
        let sampled = ops::constant(&mut ctx, vec![0.0, 0.0, 5.0], &[1, 3]).unwrap();
        let label = ops::constant(&mut ctx, vec![1.0, 0.0, 0.0], &[1, 3]).unwrap();
        let (predictions, loss) = sequence_classifier(
            &mut ctx,
            &[logits],
            &[label],
            Some(std::slice::from_ref(&sampled)),
        )
        .unwrap();
        let direct = ops::softmax(&mut ctx, &sampled).unwrap();

        let session = Session::new(&graph);
        let out = session.run(&[&loss, &predictions, &direct], &[]).unwrap();
        assert_eq_float!(out[0].data()[0], 0.41703);
        assert_eq!(out[1].data(), out[2].data());
        assert!(out[1].data()[2] > 0.9);
    }

    #[test]
    fn test_sequence_classifier_length_mismatch() {
        let mut graph = Graph::new();
        let mut ctx = BuildContext::new(&mut graph, 0);
        let logits = ops::constant(&mut ctx, vec![2.0, 1.0], &[1, 2]).unwrap();
        assert!(sequence_classifier(&mut ctx, &[logits.clone()], &[], None).is_err());
        assert!(
            sequence_classifier(&mut ctx, &[logits.clone()], &[logits.clone()], Some(&[])).is_err()
        );
    }
}
