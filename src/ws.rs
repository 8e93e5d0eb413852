use std::sync::Arc;

use log::{debug, info};
use socketioxide::extract::{Data, SocketRef, State};
use socketioxide::SocketIo;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::mapper::{Core, FeatureFrame, FrameOutput, ImuSample, OutputSink, PropagatedState};

/// Shared by every transport callback; the callbacks only deserialize and
/// push into the core queues.
#[derive(Clone)]
pub struct WebsocketState {
    pub core: Arc<Core>,
}

pub async fn handler(socket: SocketRef, _state: State<WebsocketState>) {
    info!("new connection from {}", socket.id);
    socket.on(
        "feature_cloud",
        |state: State<WebsocketState>, Data::<FeatureFrame>(frame)| {
            state.core.push_features(frame);
        },
    );
    socket.on(
        "states",
        |state: State<WebsocketState>, Data::<PropagatedState>(propagated)| {
            state.core.push_state(propagated);
        },
    );
    socket.on(
        "imu",
        |state: State<WebsocketState>, Data::<ImuSample>(sample)| {
            state.core.push_imu(sample);
        },
    );
}

/// Driver-side sink that hands frame outputs to the broadcast task.
pub struct ChannelSink {
    tx: UnboundedSender<FrameOutput>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<FrameOutput>) -> Self {
        ChannelSink { tx }
    }
}

impl OutputSink for ChannelSink {
    fn publish(&mut self, output: FrameOutput) {
        if self.tx.send(output).is_err() {
            debug!("broadcast task is gone, dropping frame output");
        }
    }
}

/// Forwards every processed frame to the connected subscribers.
pub async fn broadcast_outputs(io: SocketIo, mut rx: UnboundedReceiver<FrameOutput>) {
    while let Some(output) = rx.recv().await {
        let results = [
            io.broadcast().emit("states_updated", &output.state).await,
            io.broadcast().emit("cloud_registered", &output.registered).await,
            io.broadcast().emit("laser_map", &output.submap).await,
            io.broadcast().emit("odometry", &output.odometry).await,
            io.broadcast().emit("tf", &output.odometry).await,
            io.broadcast().emit("body_pose", &output.body_pose).await,
        ];
        for result in results {
            if let Err(err) = result {
                debug!("broadcast failed: {err}");
            }
        }
    }
}
