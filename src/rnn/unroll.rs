use crate::graph::{BuildContext, DType, GraphError, Tensor, ops};

use super::{RnnCell, State};

/// Unrolls `cell` over `inputs` inside variable scope `rnn`. Every step after the
/// first reuses the variables of the first. Without an `initial_state` the cell
/// starts from zeros of `dtype`, batch sized like the first input.
pub fn static_rnn(
    ctx: &mut BuildContext,
    cell: &dyn RnnCell,
    inputs: &[Tensor],
    initial_state: Option<State>,
    dtype: DType,
) -> Result<(Vec<Tensor>, State), GraphError> {
    let first = inputs
        .first()
        .ok_or_else(|| GraphError::shape("static_rnn", "no timesteps to unroll"))?;
    ctx.variable_scope("rnn", |ctx| {
        let mut state = match initial_state {
            Some(state) => state,
            None => cell.zero_state(ctx, first, dtype)?,
        };
        let mut outputs = Vec::with_capacity(inputs.len());
        for (i, input) in inputs.iter().enumerate() {
            if i > 0 {
                ctx.reuse_variables();
            }
            let (output, new_state) = cell.step(ctx, input, &state)?;
            outputs.push(output);
            state = new_state;
        }
        Ok((outputs, state))
    })
}

/// How a [`Bidirectional`] merges the two directions at each timestep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Combine {
    /// Forward output followed by backward output along the feature axis
    #[default]
    Concat,
}

/// Two cells run over the same sequence in opposite time directions
pub struct Bidirectional {
    pub forward: Box<dyn RnnCell>,
    pub backward: Box<dyn RnnCell>,
    pub combine: Combine,
}

impl Bidirectional {
    pub fn new(forward: Box<dyn RnnCell>, backward: Box<dyn RnnCell>) -> Self {
        Self {
            forward,
            backward,
            combine: Combine::Concat,
        }
    }

    pub fn output_size(&self) -> usize {
        match self.combine {
            Combine::Concat => self.forward.output_size() + self.backward.output_size(),
        }
    }

    /// Combined outputs in input order, and the final forward and backward states
    pub fn unroll(
        &self,
        ctx: &mut BuildContext,
        inputs: &[Tensor],
        dtype: DType,
    ) -> Result<(Vec<Tensor>, State, State), GraphError> {
        ctx.variable_scope("bidirectional_rnn", |ctx| {
            let (fw_outputs, fw_state) = ctx.variable_scope("fw", |ctx| {
                static_rnn(ctx, self.forward.as_ref(), inputs, None, dtype)
            })?;
            let reversed: Vec<Tensor> = inputs.iter().rev().cloned().collect();
            let (mut bw_outputs, bw_state) = ctx.variable_scope("bw", |ctx| {
                static_rnn(ctx, self.backward.as_ref(), &reversed, None, dtype)
            })?;
            bw_outputs.reverse();

            let outputs = fw_outputs
                .iter()
                .zip(&bw_outputs)
                .map(|(fw, bw)| match self.combine {
                    Combine::Concat => ops::concat(ctx, 1, &[fw.clone(), bw.clone()]),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok((outputs, fw_state, bw_state))
        })
    }
}
