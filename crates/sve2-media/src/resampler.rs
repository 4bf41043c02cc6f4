// crates/sve2-media/src/resampler.rs
//
// Wraps swresample to adapt a decoded audio stream to the context's sample
// rate / channel layout / sample format. Grounded on media_stream.c's
// get_next_audio_frame (in_pts/out_pts handoff through swr_next_pts using a
// split multiply-divide to dodge i64 overflow) and audio_pcm.c's
// push-everything-then-pull-everything preload pattern.

use ffmpeg_the_third as ffmpeg;
use ffmpeg::software::resampling::Context as SwrContext;
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use thiserror::Error;

use sve2_core::NS_PER_SEC;

#[derive(Debug, Error)]
pub enum ResamplerError {
    #[error("failed to build resampling context: {0}")]
    Init(String),
    #[error("conversion failed: {0}")]
    Convert(String),
}

/// Adapts one decoded stream to the context's output format. The core
/// assumes non-planar output (§4.5) so a single byte pointer can walk the
/// staging buffer; planar input is fine, swresample handles it.
pub struct AudioResampler {
    ctx: SwrContext,
    in_sample_rate: i32,
    out_sample_rate: i32,
    /// Running output-domain pts, fed by `swr_next_pts`'s input-domain pts.
    next_out_pts: i64,
    /// Bytes per interleaved sample frame in the (non-planar) output format,
    /// used to shift leading samples out of `convert`'s output buffer.
    out_stride_bytes: u32,
    /// Samples still to discard from the front of future `convert` output,
    /// set by `drop_output` (the seek landing-on-`ts`-exactly step).
    pending_drop: u32,
}

impl AudioResampler {
    pub fn new(ctx: SwrContext, in_sample_rate: i32, out_sample_rate: i32, out_stride_bytes: u32) -> Self {
        AudioResampler {
            ctx,
            in_sample_rate,
            out_sample_rate,
            next_out_pts: 0,
            out_stride_bytes,
            pending_drop: 0,
        }
    }

    /// Feeds one decoded frame (already at the stream's own rate/layout) to
    /// the resampler and writes however many converted samples are ready
    /// into `out`, rebasing `out`'s pts through the in/out sample-rate pair
    /// with a split multiply-divide (no i64 overflow even at high rates).
    ///
    /// If a `drop_output` is pending, the leading samples of this call's
    /// output are discarded first (shifted out of `out`'s buffer) and only
    /// the remainder is reported, so seeking lands on the target sample
    /// without the caller ever observing the discarded ones.
    pub fn convert(&mut self, input: &AudioFrame, out: &mut AudioFrame) -> Result<u32, ResamplerError> {
        self.ctx
            .run(input, out)
            .map_err(|e| ResamplerError::Convert(e.to_string()))?;

        if let Some(in_pts) = input.pts() {
            // time_base = in_sample_rate * out_sample_rate, matching
            // media_stream.c's overflow-avoidance comment: split the
            // multiply from the divide across two i64 ops via i128.
            let time_base = self.in_sample_rate as i64 * self.out_sample_rate as i64;
            let scaled_in_pts = rescale(in_pts, time_base, self.in_sample_rate as i64);
            self.next_out_pts = rescale(scaled_in_pts, NS_PER_SEC, time_base);
            out.set_pts(Some(self.next_out_pts));
        }

        let produced = out.samples() as u32;
        if self.pending_drop == 0 {
            return Ok(produced);
        }

        let dropped = self.pending_drop.min(produced);
        self.pending_drop -= dropped;
        let kept = produced - dropped;

        if dropped > 0 && kept > 0 {
            let stride = self.out_stride_bytes as usize;
            let drop_bytes = dropped as usize * stride;
            let keep_bytes = kept as usize * stride;
            let data = out.data_mut(0);
            data.copy_within(drop_bytes..drop_bytes + keep_bytes, 0);
        }

        Ok(kept)
    }

    /// Preload path: push a frame into the resampler's internal FIFO without
    /// pulling any output yet (audio_pcm_open's loop).
    pub fn push(&mut self, input: &AudioFrame) -> Result<(), ResamplerError> {
        let mut sink = AudioFrame::empty();
        self.ctx
            .run(input, &mut sink)
            .map_err(|e| ResamplerError::Convert(e.to_string()))?;
        Ok(())
    }

    /// Discards the next `n` output samples across subsequent `convert`
    /// calls. Used by seek to land exactly on the target timestamp after
    /// decoding forward to the frame straddling it (§4.6).
    pub fn drop_output(&mut self, n: u32) {
        self.pending_drop = self.pending_drop.saturating_add(n);
    }

    pub fn out_sample_rate(&self) -> i32 {
        self.out_sample_rate
    }

    pub fn flush(&mut self) {
        // swresample's internal buffer is drained by running with a null
        // input; ffmpeg-the-third's Context::flush (if present) does this.
        self.next_out_pts = 0;
        self.pending_drop = 0;
    }
}

fn rescale(value: i64, mul: i64, div: i64) -> i64 {
    ((value as i128 * mul as i128) / div as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescale_matches_reference_overflow_avoidance() {
        // stream at 48000, decoder pts in stream samples, scaled by time_base
        // = in*out, then back down by NS_PER_SEC/time_base — should equal a
        // straight rational rebase without intermediate overflow.
        let pts = 48000i64;
        let in_rate = 48000i64;
        let out_rate = 44100i64;
        let time_base = in_rate * out_rate;
        let scaled = rescale(pts, time_base, in_rate);
        let ns = rescale(scaled, NS_PER_SEC, time_base);
        // 48000 samples at 48000Hz = 1 second = NS_PER_SEC ns
        assert_eq!(ns, NS_PER_SEC);
    }
}
