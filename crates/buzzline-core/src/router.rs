//! Routes decoded client actions to their handlers.

use serde_json::Value;
use tracing::{debug, info};

use crate::actions::ClientAction;
use crate::errors::GameError;
use crate::events::{Outbound, ServerEvent, View};
use crate::game::{Game, Phase};
use crate::ids::{ConnectionId, SessionToken};
use crate::participant::Participant;
use crate::roles::HostClaim;

impl Game {
    /// Apply `action` on behalf of `id` and return the events it produced.
    pub fn dispatch(
        &mut self,
        id: &ConnectionId,
        action: ClientAction,
    ) -> Result<Vec<Outbound>, GameError> {
        if self.connections.get(id) != Some(&Phase::Active) {
            return Err(GameError::NotOpen(id.clone()));
        }
        debug!(connection_id = %id, action = action.name(), "dispatch");

        match action {
            ClientAction::Join { name } => self.join(id, &name),
            ClientAction::Host => self.claim_host(id),
            ClientAction::Buzz => self.buzz(id),
            ClientAction::ClearBuzzers => self.clear_buzzers(id),
            ClientAction::ChangeScore { target, delta } => self.change_score(id, &target, delta),
            ClientAction::KickPlayer { target } => self.kick(id, &target),
            ClientAction::RequestBet { target } => self.request_bet(&target),
            ClientAction::RequestAllBets => Ok(self.request_all_bets()),
            ClientAction::SubmitBet { value } => self.submit_bet(id, value),
            ClientAction::RequestAllAnswers => Ok(self.request_all_answers()),
            ClientAction::SubmitAnswer { value } => self.submit_answer(id, value),
        }
    }

    fn join(&mut self, id: &ConnectionId, name: &str) -> Result<Vec<Outbound>, GameError> {
        let _ = self.registry.admit(id);
        let rename = self
            .roles
            .claim_player(id, name, &mut self.registry)
            .ok_or_else(|| GameError::UnknownParticipant(id.clone()))?;
        info!(connection_id = %id, player = rename.name(), "player joined");

        let mut out = Vec::new();
        if rename.is_changed() {
            out.push(Outbound::broadcast(self.presence_event()));
        }
        out.push(Outbound::broadcast(self.roster_event()));
        self.direct(&mut out, id, ServerEvent::Redirect { url: View::Buzzer });
        Ok(out)
    }

    fn claim_host(&mut self, id: &ConnectionId) -> Result<Vec<Outbound>, GameError> {
        let was_player = self.registry.admit(id).is_player();
        let connections = &self.connections;
        let claim = self
            .roles
            .claim_host(id, &mut self.registry, |c| connections.contains_key(c));

        let mut out = Vec::new();
        match claim {
            HostClaim::Denied { .. } => {
                return Err(GameError::Unauthorized {
                    action: "host",
                    reason: "this game already has a host",
                })
            }
            HostClaim::AlreadyHost => {}
            HostClaim::Granted { .. } => {
                if self.buzzers.remove(id) {
                    out.push(Outbound::broadcast(self.buzz_event()));
                }
                if was_player {
                    out.push(Outbound::broadcast(self.roster_event()));
                }
            }
        }
        self.direct(&mut out, id, ServerEvent::Redirect { url: View::Host });
        Ok(out)
    }

    fn buzz(&mut self, id: &ConnectionId) -> Result<Vec<Outbound>, GameError> {
        let name = self.require_player(id, "buzz", "only players can buzz")?.name.clone();
        if !self.buzzers.buzz(id) {
            debug!(connection_id = %id, player = %name, "already buzzed");
            return Ok(Vec::new());
        }
        info!(connection_id = %id, player = %name, position = self.buzzers.len(), "buzz");

        let mut out = Vec::new();
        if let Some(host) = self.roles.host() {
            self.direct(&mut out, host, self.buzz_event());
        }
        self.direct(&mut out, id, self.buzz_event());
        Ok(out)
    }

    fn clear_buzzers(&mut self, id: &ConnectionId) -> Result<Vec<Outbound>, GameError> {
        self.require_host(id, "clearBuzzers", "only the host can clear the buzzers")?;
        self.buzzers.clear();
        info!("buzzers cleared");
        Ok(vec![Outbound::broadcast(self.buzz_event())])
    }

    fn change_score(
        &mut self,
        id: &ConnectionId,
        target: &str,
        delta: i64,
    ) -> Result<Vec<Outbound>, GameError> {
        self.require_host(id, "changeScore", "only the host can modify scores")?;
        let target_id = self.target(target)?;
        let participant = self
            .registry
            .get_mut(&target_id)
            .ok_or_else(|| GameError::UnknownTarget(target.to_owned()))?;
        participant.score = participant.score.saturating_add(delta);
        let event = ServerEvent::Score {
            player: participant.name.clone(),
            value: participant.score,
        };
        info!(player = target, delta, score = participant.score, "score changed");

        let mut out = Vec::new();
        self.direct(&mut out, id, event.clone());
        if target_id != *id {
            self.direct(&mut out, &target_id, event);
        }
        Ok(out)
    }

    fn kick(&mut self, id: &ConnectionId, target: &str) -> Result<Vec<Outbound>, GameError> {
        self.require_host(id, "kickPlayer", "only the host can kick players")?;
        let target_id = self.target(target)?;
        info!(player = target, "kicking participant");

        let mut out = Vec::new();
        self.direct(
            &mut out,
            &target_id,
            ServerEvent::SetCookie {
                name: self.config.token_cookie.clone(),
                value: SessionToken::NOT_SET.to_owned(),
                minutes: self.config.kicked_cookie_minutes,
            },
        );
        self.direct(&mut out, &target_id, ServerEvent::Redirect { url: View::Join });

        let _ = self.registry.remove(&target_id);
        let _ = self.roles.release(&target_id);
        if self.buzzers.remove(&target_id) {
            out.push(Outbound::broadcast(self.buzz_event()));
        }
        out.push(Outbound::broadcast(self.roster_event()));
        Ok(out)
    }

    fn request_bet(&self, target: &str) -> Result<Vec<Outbound>, GameError> {
        let target_id = self.target(target)?;
        let score = match self.registry.get(&target_id) {
            Some(p) if p.is_player() => p.score,
            _ => return Err(GameError::NotAPlayer(target.to_owned())),
        };
        info!(player = target, "bet requested");
        let mut out = Vec::new();
        self.direct(&mut out, &target_id, ServerEvent::RequestBet { score });
        Ok(out)
    }

    fn request_all_bets(&self) -> Vec<Outbound> {
        let mut out = Vec::new();
        for player in self.registry.players() {
            self.direct(&mut out, &player.id, ServerEvent::RequestBet { score: player.score });
        }
        out
    }

    fn submit_bet(&self, id: &ConnectionId, value: Value) -> Result<Vec<Outbound>, GameError> {
        let player = self.require_player(id, "submitBet", "only players can bet")?;
        info!(player = %player.name, bet = %value, "bet submitted");
        Ok(self.to_host(ServerEvent::SubmitBet {
            player: player.name.clone(),
            value,
        }))
    }

    fn request_all_answers(&self) -> Vec<Outbound> {
        let mut out = Vec::new();
        for player in self.registry.players() {
            self.direct(&mut out, &player.id, ServerEvent::RequestAnswer);
        }
        out
    }

    fn submit_answer(&self, id: &ConnectionId, value: Value) -> Result<Vec<Outbound>, GameError> {
        let player = self.require_player(id, "submitAnswer", "only players can answer")?;
        info!(player = %player.name, answer = %value, "answer submitted");
        Ok(self.to_host(ServerEvent::SubmitAnswer {
            player: player.name.clone(),
            value,
        }))
    }

    fn to_host(&self, event: ServerEvent) -> Vec<Outbound> {
        let mut out = Vec::new();
        match self.roles.host() {
            Some(host) => self.direct(&mut out, host, event),
            None => debug!(event = event.kind(), "no host to receive event"),
        }
        out
    }

    fn require_host(
        &self,
        id: &ConnectionId,
        action: &'static str,
        reason: &'static str,
    ) -> Result<(), GameError> {
        if self.roles.is_host(id) {
            Ok(())
        } else {
            Err(GameError::Unauthorized { action, reason })
        }
    }

    fn require_player(
        &self,
        id: &ConnectionId,
        action: &'static str,
        reason: &'static str,
    ) -> Result<&Participant, GameError> {
        match self.registry.get(id) {
            Some(p) if p.is_player() => Ok(p),
            Some(_) => Err(GameError::Unauthorized { action, reason }),
            None => Err(GameError::UnknownParticipant(id.clone())),
        }
    }

    fn target(&self, name: &str) -> Result<ConnectionId, GameError> {
        self.registry
            .id_by_name(name)
            .cloned()
            .ok_or_else(|| GameError::UnknownTarget(name.to_owned()))
    }
}
