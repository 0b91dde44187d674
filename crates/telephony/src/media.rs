//! Media transcode and pacing
//!
//! Inbound: base64 mu-law at 8kHz -> PCM16 -> stateful x2 upsample ->
//! 16kHz frames for the pipeline. Outbound: 24kHz synthesis chunks ->
//! 8kHz -> mu-law -> 160-byte frames paced one per 20ms. The provider does
//! not rate-limit; bursting collapses prosody and breaks clear semantics,
//! so the pacing sleep is deliberate.

use std::collections::VecDeque;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::sync::mpsc;

use switchboard_config::constants::audio::{FRAME_BYTES_MULAW, FRAME_MS};
use switchboard_core::{mulaw, AudioFrame, Downsampler, SampleRate, Upsampler2x};
use switchboard_pipeline::{AudioOutputQueue, ControlSignal};

use crate::protocol::{MediaPayload, OutboundFrame};

/// Decodes inbound provider media payloads into 16kHz pipeline frames.
pub struct InboundDecoder {
    upsampler: Upsampler2x,
    sequence: u64,
    malformed: u64,
}

impl InboundDecoder {
    pub fn new() -> Self {
        Self {
            upsampler: Upsampler2x::new(),
            sequence: 0,
            malformed: 0,
        }
    }

    /// Decode one media payload. Malformed payloads are counted, logged,
    /// and skipped; every valid 20ms inbound frame yields a 20ms 16kHz
    /// frame downstream.
    pub fn decode(&mut self, payload: &str) -> Option<AudioFrame> {
        let mulaw_bytes = match BASE64.decode(payload.as_bytes()) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                self.malformed += 1;
                tracing::warn!(count = self.malformed, "Empty media payload discarded");
                return None;
            },
            Err(e) => {
                self.malformed += 1;
                tracing::warn!(
                    count = self.malformed,
                    error = %e,
                    "Undecodable media payload discarded"
                );
                return None;
            },
        };

        let pcm_8k = mulaw::decode(&mulaw_bytes);
        let pcm_16k = self.upsampler.process(&pcm_8k);

        let frame = AudioFrame::new(pcm_16k, SampleRate::Hz16000, self.sequence);
        self.sequence += 1;
        Some(frame)
    }

    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }
}

impl Default for InboundDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Paces synthesized audio out to the provider.
///
/// Pulls chunks from the pipeline's output queue, downsamples and encodes
/// them, and emits one 160-byte mu-law frame per 20ms tick. A clear signal
/// drops the queue, the local byte buffer, and tells the provider to flush
/// its own playback buffer.
pub struct FrameSender {
    stream_sid: String,
    output: Arc<AudioOutputQueue>,
    control_rx: mpsc::UnboundedReceiver<ControlSignal>,
    frame_tx: mpsc::Sender<OutboundFrame>,
    downsampler: Downsampler,
    pending: VecDeque<u8>,
}

impl FrameSender {
    pub fn new(
        stream_sid: String,
        output: Arc<AudioOutputQueue>,
        control_rx: mpsc::UnboundedReceiver<ControlSignal>,
        frame_tx: mpsc::Sender<OutboundFrame>,
        tts_chunk_ms: u64,
    ) -> Self {
        let chunk_samples =
            SampleRate::Hz24000.as_u32() as usize * tts_chunk_ms as usize / 1000;
        Self {
            stream_sid,
            output,
            control_rx,
            frame_tx,
            downsampler: Downsampler::new(
                SampleRate::Hz24000.as_u32(),
                SampleRate::Hz8000.as_u32(),
                chunk_samples,
            ),
            pending: VecDeque::new(),
        }
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(FRAME_MS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                // A clear must preempt the pacing tick.
                biased;

                signal = self.control_rx.recv() => {
                    match signal {
                        Some(ControlSignal::Clear) => {
                            if !self.handle_clear().await {
                                break;
                            }
                        },
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if !self.send_one_frame().await {
                        break;
                    }
                }
            }
        }

        tracing::debug!(stream_sid = %self.stream_sid, "Frame sender stopped");
    }

    /// Drop everything queued locally and flush the provider buffer.
    async fn handle_clear(&mut self) -> bool {
        let dropped = self.output.clear();
        self.pending.clear();
        tracing::debug!(
            dropped_chunks = dropped,
            "Clear: dropped queued audio, flushing provider"
        );
        self.frame_tx
            .send(OutboundFrame::Clear {
                stream_sid: self.stream_sid.clone(),
            })
            .await
            .is_ok()
    }

    /// Emit at most one mu-law frame for this tick.
    async fn send_one_frame(&mut self) -> bool {
        // Top up the byte buffer from queued synthesis chunks.
        while self.pending.len() < FRAME_BYTES_MULAW {
            match self.output.try_pop() {
                Some(chunk) => {
                    let pcm_8k = self.downsampler.process(&chunk.samples);
                    self.pending.extend(mulaw::encode(&pcm_8k));
                },
                None => break,
            }
        }

        if self.pending.is_empty() {
            return true;
        }

        let take = self.pending.len().min(FRAME_BYTES_MULAW);
        // A partial frame only goes out when nothing more is queued.
        if take < FRAME_BYTES_MULAW && !self.output.is_empty() {
            return true;
        }

        let frame_bytes: Vec<u8> = self.pending.drain(..take).collect();
        self.frame_tx
            .send(OutboundFrame::Media {
                stream_sid: self.stream_sid.clone(),
                media: MediaPayload {
                    payload: BASE64.encode(&frame_bytes),
                },
            })
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_produces_20ms_16k_frames() {
        let mut decoder = InboundDecoder::new();
        let mulaw_frame = vec![0xFFu8; 160]; // 20ms of mu-law silence
        let payload = BASE64.encode(&mulaw_frame);

        let frame = decoder.decode(&payload).expect("valid frame");
        assert_eq!(frame.sample_rate, SampleRate::Hz16000);
        assert_eq!(frame.samples.len(), 320);
        assert_eq!(frame.duration_ms(), 20);
    }

    #[test]
    fn test_decoder_counts_malformed() {
        let mut decoder = InboundDecoder::new();
        assert!(decoder.decode("!!not-base64!!").is_none());
        assert!(decoder.decode("").is_none());
        assert_eq!(decoder.malformed_count(), 2);

        // Still works afterwards.
        let payload = BASE64.encode(vec![0xFFu8; 160]);
        assert!(decoder.decode(&payload).is_some());
    }

    #[test]
    fn test_decoder_sequences_frames() {
        let mut decoder = InboundDecoder::new();
        let payload = BASE64.encode(vec![0xFFu8; 160]);
        assert_eq!(decoder.decode(&payload).unwrap().sequence, 0);
        assert_eq!(decoder.decode(&payload).unwrap().sequence, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sender_paces_and_frames() {
        let output = AudioOutputQueue::new();
        let (_control_tx, control_rx) = mpsc::unbounded_channel();
        let (frame_tx, mut frame_rx) = mpsc::channel(64);

        // Two 240-sample 24kHz chunks -> 80 samples each at 8kHz -> exactly
        // one 160-byte frame. (Sizes below the FFT chunk take the linear
        // resampling path, which is deterministic.)
        output.push(AudioFrame::new(vec![1000i16; 240], SampleRate::Hz24000, 0));
        output.push(AudioFrame::new(vec![1000i16; 240], SampleRate::Hz24000, 1));

        let sender = FrameSender::new(
            "MZ1".to_string(),
            output.clone(),
            control_rx,
            frame_tx,
            100,
        );
        let handle = tokio::spawn(sender.run());

        tokio::time::advance(std::time::Duration::from_millis(25)).await;
        let frame = frame_rx.recv().await.expect("one media frame");
        match frame {
            OutboundFrame::Media { stream_sid, media } => {
                assert_eq!(stream_sid, "MZ1");
                let bytes = BASE64.decode(media.payload.as_bytes()).unwrap();
                assert_eq!(bytes.len(), 160);
            },
            other => panic!("unexpected frame: {:?}", other),
        }

        // No more queued audio: the next ticks emit nothing.
        tokio::time::advance(std::time::Duration::from_millis(100)).await;
        assert!(frame_rx.try_recv().is_err());

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_flushes_and_notifies_provider() {
        let output = AudioOutputQueue::new();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (frame_tx, mut frame_rx) = mpsc::channel(64);

        for i in 0..10 {
            output.push(AudioFrame::new(vec![1000i16; 240], SampleRate::Hz24000, i));
        }

        let sender = FrameSender::new(
            "MZ1".to_string(),
            output.clone(),
            control_rx,
            frame_tx,
            100,
        );
        let handle = tokio::spawn(sender.run());

        control_tx.send(ControlSignal::Clear).unwrap();
        tokio::time::advance(std::time::Duration::from_millis(5)).await;

        let frame = frame_rx.recv().await.expect("clear frame");
        assert!(matches!(frame, OutboundFrame::Clear { .. }));
        assert!(output.is_empty());

        handle.abort();
    }
}
