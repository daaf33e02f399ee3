use candle_core::Tensor;
use layers::checks;

use crate::error::{ModelError, Result};

/// Level-stack decoder: the forecast repeats the final level estimate.
#[derive(Debug, Clone, Copy, Default)]
pub struct LevelStack;

impl LevelStack {
    /// `[batch, time, features] -> [batch, steps, features]`.
    pub fn forward(&self, level: &Tensor, steps: usize) -> Result<Tensor> {
        if steps == 0 {
            return Err(ModelError::EmptyHorizon);
        }
        checks::expect_rank("level_stack.input", level, 3)?;
        let (batch, len, features) = level.dims3()?;
        if len == 0 {
            return Err(candle_core::Error::Msg("level_stack.input has an empty time axis".into()).into());
        }
        Ok(level
            .narrow(1, len - 1, 1)?
            .broadcast_as((batch, steps, features))?
            .contiguous()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn repeats_the_last_step() -> Result<()> {
        let level = Tensor::new(&[[[1f32, 2.], [3., 4.], [5., 6.]]], &Device::Cpu)?;
        let out = LevelStack.forward(&level, 3)?;
        assert_eq!(out.dims(), &[1, 3, 2]);
        assert_eq!(
            out.to_vec3::<f32>()?,
            vec![vec![vec![5., 6.], vec![5., 6.], vec![5., 6.]]]
        );
        Ok(())
    }

    #[test]
    fn zero_steps_is_an_error() -> Result<()> {
        let level = Tensor::ones((1, 3, 1), candle_core::DType::F32, &Device::Cpu)?;
        assert!(matches!(
            LevelStack.forward(&level, 0),
            Err(ModelError::EmptyHorizon)
        ));
        Ok(())
    }
}
