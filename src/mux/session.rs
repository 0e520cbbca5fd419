use std::{
    sync::mpsc::{Receiver, RecvTimeoutError},
    time::Instant,
};

use crate::TrackKind;

use super::{Document, EncodedChunk, Mp4FileMuxerOptions, MuxError, SampleAccumulator, assemble};

/// エンコーダーからチャネル経由で届くイベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderEvent {
    /// トラックのエンコーダーの設定が完了した
    Configured(TrackKind),

    /// エンコード済みのチャンクが出力された
    Chunk(TrackKind, EncodedChunk),

    /// エンコーダーでエラーが発生した
    Error(String),

    /// トラックのエンコーダーが閉じられた
    Closed(TrackKind),
}

/// エンコーダーのイベントを受け取って [`SampleAccumulator`] に蓄積し、最後に [`Document`] を生成するセッション
///
/// エンコーダーがエラーを報告した後は、どのメソッドを呼んでも同じ [`MuxError::EncoderFailed`] が返される
#[derive(Debug)]
pub struct MuxSession {
    accumulator: SampleAccumulator,
    options: Mp4FileMuxerOptions,
    configured: [bool; 2],
    closed: [bool; 2],
    failure: Option<String>,
}

impl MuxSession {
    /// オプションを指定してセッションを開始する
    pub fn new(options: Mp4FileMuxerOptions) -> Self {
        Self {
            accumulator: SampleAccumulator::with_options(&options),
            options,
            configured: [false; 2],
            closed: [false; 2],
            failure: None,
        }
    }

    /// これまでに蓄積されたサンプルを参照する
    pub fn accumulator(&self) -> &SampleAccumulator {
        &self.accumulator
    }

    /// 指定トラックのエンコーダーの設定が完了しているかどうか
    pub fn is_configured(&self, track: TrackKind) -> bool {
        self.configured[slot(track)]
    }

    /// 指定トラックの [`EncoderEvent::Configured`] が届くまで待つ
    ///
    /// 待っている間に届いた他のイベントは到着順に処理される。
    /// [`Mp4FileMuxerOptions::config_timeout`] を過ぎた場合は [`MuxError::ConfigurationTimeout`]、
    /// 設定完了前にエンコーダーが閉じられた場合は [`MuxError::EncoderClosed`] を返す
    pub fn wait_configured(
        &mut self,
        rx: &Receiver<EncoderEvent>,
        track: TrackKind,
    ) -> Result<(), MuxError> {
        self.check_failure()?;
        let deadline = Instant::now() + self.options.config_timeout;
        while !self.is_configured(track) {
            if self.closed[slot(track)] {
                return Err(MuxError::EncoderClosed(track));
            }
            let timeout = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(timeout) {
                Ok(event) => self.handle_event(event)?,
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(
                        %track,
                        timeout = ?self.options.config_timeout,
                        "encoder configuration timed out"
                    );
                    return Err(MuxError::ConfigurationTimeout(track));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(MuxError::EncoderClosed(track));
                }
            }
        }
        Ok(())
    }

    /// 一つのイベントを処理する
    pub fn handle_event(&mut self, event: EncoderEvent) -> Result<(), MuxError> {
        self.check_failure()?;
        match event {
            EncoderEvent::Configured(track) => {
                tracing::debug!(%track, "encoder configured");
                self.configured[slot(track)] = true;
            }
            EncoderEvent::Chunk(track, chunk) => {
                self.accumulator.push_chunk(track, chunk)?;
            }
            EncoderEvent::Error(reason) => {
                tracing::warn!(%reason, "encoder reported an error");
                self.failure = Some(reason.clone());
                return Err(MuxError::EncoderFailed(reason));
            }
            EncoderEvent::Closed(track) => {
                tracing::debug!(%track, "encoder closed");
                self.closed[slot(track)] = true;
            }
        }
        Ok(())
    }

    /// チャネルが切断されるまでイベントを処理し続ける
    pub fn drain(&mut self, rx: &Receiver<EncoderEvent>) -> Result<(), MuxError> {
        self.check_failure()?;
        for event in rx.iter() {
            self.handle_event(event)?;
        }
        Ok(())
    }

    /// 蓄積を終了して [`Document`] を組み立てる
    pub fn finish(self) -> Result<Document, MuxError> {
        self.check_failure()?;
        let (video, audio) = self.accumulator.finish();
        assemble(video, audio, &self.options)
    }

    fn check_failure(&self) -> Result<(), MuxError> {
        match &self.failure {
            Some(reason) => Err(MuxError::EncoderFailed(reason.clone())),
            None => Ok(()),
        }
    }
}

fn slot(track: TrackKind) -> usize {
    match track {
        TrackKind::Video => 0,
        TrackKind::Audio => 1,
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc, time::Duration};

    use super::*;

    fn session(timeout: Duration) -> MuxSession {
        let mut options = Mp4FileMuxerOptions::default();
        options.config_timeout = timeout;
        MuxSession::new(options)
    }

    fn chunk(timestamp_us: u64) -> EncodedChunk {
        EncodedChunk {
            data: vec![0; 4],
            timestamp_us,
            duration_us: Some(20_000),
            keyframe: true,
            decoder_config: None,
        }
    }

    #[test]
    fn chunks_before_configuration_are_kept_in_order() {
        let (tx, rx) = mpsc::channel();
        tx.send(EncoderEvent::Chunk(TrackKind::Audio, chunk(0))).expect("send");
        tx.send(EncoderEvent::Chunk(TrackKind::Audio, chunk(20_000))).expect("send");
        tx.send(EncoderEvent::Configured(TrackKind::Audio)).expect("send");

        let mut session = session(Duration::from_secs(1));
        session.wait_configured(&rx, TrackKind::Audio).expect("configured");
        assert!(session.is_configured(TrackKind::Audio));
        assert!(!session.is_configured(TrackKind::Video));

        let audio = session.accumulator().track(TrackKind::Audio);
        let timestamps: Vec<_> = audio.samples.iter().map(|s| s.decode_timestamp).collect();
        assert_eq!(timestamps, [0, 960]);
    }

    #[test]
    fn configuration_wait_times_out() {
        let (_tx, rx) = mpsc::channel();
        let mut session = session(Duration::from_millis(20));
        let result = session.wait_configured(&rx, TrackKind::Video);
        assert!(matches!(
            result,
            Err(MuxError::ConfigurationTimeout(TrackKind::Video))
        ));
    }

    #[test]
    fn closed_encoder_fails_the_wait() {
        let (tx, rx) = mpsc::channel();
        tx.send(EncoderEvent::Closed(TrackKind::Video)).expect("send");
        let mut session = session(Duration::from_secs(5));
        let result = session.wait_configured(&rx, TrackKind::Video);
        assert!(matches!(
            result,
            Err(MuxError::EncoderClosed(TrackKind::Video))
        ));

        drop(tx);
        let result = session.wait_configured(&rx, TrackKind::Audio);
        assert!(matches!(
            result,
            Err(MuxError::EncoderClosed(TrackKind::Audio))
        ));
    }

    #[test]
    fn encoder_error_is_raised_again_by_later_calls() {
        let (tx, rx) = mpsc::channel();
        tx.send(EncoderEvent::Error("boom".to_owned())).expect("send");
        drop(tx);

        let mut session = session(Duration::from_secs(1));
        let first = session.drain(&rx);
        assert!(matches!(first, Err(MuxError::EncoderFailed(ref m)) if m == "boom"));

        let again = session.handle_event(EncoderEvent::Configured(TrackKind::Video));
        assert!(matches!(again, Err(MuxError::EncoderFailed(ref m)) if m == "boom"));
        assert!(!session.is_configured(TrackKind::Video));

        let finished = session.finish();
        assert!(matches!(finished, Err(MuxError::EncoderFailed(ref m)) if m == "boom"));
    }

    #[test]
    fn finish_without_video_samples() {
        let (tx, rx) = mpsc::channel();
        tx.send(EncoderEvent::Chunk(TrackKind::Audio, chunk(0))).expect("send");
        drop(tx);

        let mut session = session(Duration::from_secs(1));
        session.drain(&rx).expect("drain");
        assert!(matches!(session.finish(), Err(MuxError::NoVideoSamples)));
    }
}
