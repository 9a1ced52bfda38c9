use std::str::FromStr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::db::store::AccountStore;
use crate::input::binder::bind_and_run;
use crate::input::game::{GameOutcome, GameRecognizer};
use crate::input::stack::{stack_for, Mode, Recognition};
use crate::input::{admin, user};
use crate::model::account::Role;
use crate::model::{Account, WorldObject};
use crate::tasks::sessions::{SessionHub, SessionId, TransportKind};
use crate::values::{root_object, Failure, ObjId, Value};
use crate::vm::Engine;

const DEFAULT_CONFUSION: &str = "I don't understand that.";
const DEFAULT_UNBOUND: &str = "You can't do that here.";
const MAX_FAILED_LOGINS: u32 = 3;

/// What the transport should do after a processed line.
#[derive(Debug, Eq, PartialEq)]
pub enum LineOutcome {
    Continue,
    Disconnect,
}

/// The per-session command surface: the pre-authentication state machine,
/// then the recognizer stack and the in-engine User/Admin handlers, with
/// Game recognitions handed to the binder.
pub struct Shell {
    pub engine: Arc<Engine>,
    pub hub: Arc<SessionHub>,
    pub accounts: Arc<dyn AccountStore>,
}

impl Shell {
    pub fn new(engine: Arc<Engine>, hub: Arc<SessionHub>, accounts: Arc<dyn AccountStore>) -> Self {
        Self {
            engine,
            hub,
            accounts,
        }
    }

    /// The connect banner and login prompt.
    pub async fn greet(&self, sid: SessionId) {
        self.reply(sid, "Welcome to GAIA.").await;
        self.reply(
            sid,
            "CONNECT <user> <password> to play, or CREATE <user> <password> [email] to register.",
        )
        .await;
    }

    pub async fn process_line(&self, sid: SessionId, raw: &str) -> LineOutcome {
        let line = raw.trim();
        if line.is_empty() {
            return LineOutcome::Continue;
        }
        if !self.hub.is_authenticated(sid) {
            return self.login_machine(sid, line).await;
        }

        let is_admin = self.hub.is_admin(sid);
        let embodied = self.hub.is_embodied(sid);
        for mode in stack_for(is_admin, embodied) {
            match mode {
                Mode::Admin => {
                    if let Some(recognition) = admin::recognize(&self.engine.registry, line) {
                        return self.dispatch_admin(sid, recognition).await;
                    }
                }
                Mode::User => {
                    if let Some(recognition) = user::recognize(&self.engine.registry, line) {
                        return self.dispatch_user(sid, recognition).await;
                    }
                }
                Mode::Game => {
                    let Ok(actor) = self.hub.actor_of(sid) else {
                        break;
                    };
                    let recognizer = GameRecognizer {
                        registry: &self.engine.registry,
                        cache: &self.engine.cache,
                    };
                    let last = self.hub.last_interaction(sid);
                    match recognizer.recognize(&actor, last.as_ref(), line).await {
                        Ok(GameOutcome::Recognized(recognition)) => {
                            return self.dispatch_game(sid, recognition).await;
                        }
                        Ok(GameOutcome::Disambiguate(question)) => {
                            self.reply(sid, &question).await;
                            return LineOutcome::Continue;
                        }
                        Ok(GameOutcome::NotRecognized) => {}
                        Err(failure) => {
                            self.reply(sid, &failure.diagnostic()).await;
                            return LineOutcome::Continue;
                        }
                    }
                }
            }
        }
        self.reply(sid, DEFAULT_CONFUSION).await;
        LineOutcome::Continue
    }

    async fn reply(&self, sid: SessionId, line: &str) {
        if let Err(e) = self.hub.send_line(sid, line).await {
            warn!(session = %sid, error = %e, "reply failed");
        }
    }

    // The pre-authentication state machine: only CONNECT, CREATE and QUIT
    // are meaningful; everything else is a protocol nudge. Three failed
    // logins on a telnet session end it.
    async fn login_machine(&self, sid: SessionId, line: &str) -> LineOutcome {
        let words: Vec<&str> = line.split_whitespace().collect();
        let keyword = words[0].to_lowercase();
        match keyword.as_str() {
            "connect" if words.len() == 3 => self.try_login(sid, words[1], words[2]).await,
            "create" if words.len() >= 3 => {
                self.create_account(sid, words[1], words[2], words.get(3).copied())
                    .await
            }
            "quit" => {
                self.reply(sid, "Goodbye.").await;
                LineOutcome::Disconnect
            }
            _ => {
                self.reply(sid, "Please CONNECT <user> <password> first.").await;
                LineOutcome::Continue
            }
        }
    }

    async fn try_login(&self, sid: SessionId, login: &str, password: &str) -> LineOutcome {
        let found = match self.accounts.fetch_by_login(login).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "account lookup failed");
                self.reply(sid, "The account service is unavailable.").await;
                return LineOutcome::Continue;
            }
        };
        let verified = found
            .as_ref()
            .map(|(account, _)| account.verify_password(password))
            .unwrap_or(false);
        if !verified {
            let failures = self.hub.bump_failed_logins(sid);
            self.reply(sid, "That account and password do not match.").await;
            if failures >= MAX_FAILED_LOGINS
                && self.hub.kind_of(sid) == Some(TransportKind::Telnet)
            {
                self.reply(sid, "Too many failed logins.").await;
                return LineOutcome::Disconnect;
            }
            return LineOutcome::Continue;
        }

        let (mut account, revision) = found.expect("verified implies present");
        account.last_login = Some(chrono::Utc::now());
        if let Err(e) = self.accounts.store(&account, Some(&revision)).await {
            warn!(error = %e, "could not record last login");
        }
        let display = account.display_name.clone();
        let characters = self.character_names(&account).await;
        if self.hub.authenticate(sid, account).is_err() {
            return LineOutcome::Disconnect;
        }
        info!(session = %sid, login = %login, "authenticated");
        self.reply(sid, &format!("*** Connected as {} ***", display))
            .await;
        if characters.is_empty() {
            self.reply(sid, "No characters yet. An admin can grant you one.")
                .await;
        } else {
            self.reply(
                sid,
                &format!(
                    "Characters: {}. CONNECT character <name> to embody one.",
                    characters.join(", ")
                ),
            )
            .await;
        }
        LineOutcome::Continue
    }

    async fn create_account(
        &self,
        sid: SessionId,
        login: &str,
        password: &str,
        email: Option<&str>,
    ) -> LineOutcome {
        match self.accounts.fetch_by_login(login).await {
            Ok(Some(_)) => {
                self.reply(sid, "That login is taken.").await;
                return LineOutcome::Continue;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "account lookup failed");
                self.reply(sid, "The account service is unavailable.").await;
                return LineOutcome::Continue;
            }
        }
        let account = match Account::new(login, password, email.unwrap_or_default()) {
            Ok(account) => account,
            Err(e) => {
                warn!(error = %e, "account creation failed");
                self.reply(sid, "Could not create that account.").await;
                return LineOutcome::Continue;
            }
        };
        if let Err(e) = self.accounts.store(&account, None).await {
            warn!(error = %e, "account store failed");
            self.reply(sid, "Could not create that account.").await;
            return LineOutcome::Continue;
        }
        info!(login = %login, "account created");
        self.reply(
            sid,
            &format!("Account created. CONNECT {} <password> to play.", login),
        )
        .await;
        LineOutcome::Continue
    }

    async fn character_names(&self, account: &Account) -> Vec<String> {
        let mut names = Vec::new();
        for id in &account.character_ids {
            if let Ok(Some(obj)) = self.engine.cache.get(id).await {
                names.push(if obj.name.is_empty() {
                    id.to_string()
                } else {
                    obj.name.clone()
                });
            }
        }
        names
    }

    async fn dispatch_user(&self, sid: SessionId, recognition: Recognition) -> LineOutcome {
        match recognition.verb.as_str() {
            "connect" => {
                if recognition
                    .args
                    .first()
                    .map(|w| w.eq_ignore_ascii_case("character"))
                    .unwrap_or(false)
                {
                    let name = recognition.args[1..].join(" ");
                    self.embody_character(sid, &name).await;
                } else {
                    self.reply(sid, "You are already connected.").await;
                }
                LineOutcome::Continue
            }
            "create" => {
                self.reply(sid, "You are already connected.").await;
                LineOutcome::Continue
            }
            "who" => {
                for line in self.who_lines() {
                    self.reply(sid, &line).await;
                }
                LineOutcome::Continue
            }
            "commands" => {
                let user_commands: Vec<String> = {
                    let mut c: Vec<String> = self
                        .engine
                        .registry
                        .user_commands()
                        .iter()
                        .map(|c| c.to_uppercase())
                        .collect();
                    c.sort();
                    c
                };
                self.reply(sid, &format!("User commands: {}", user_commands.join(", ")))
                    .await;
                if self.hub.is_admin(sid) {
                    let mut admin_commands: Vec<String> = self
                        .engine
                        .registry
                        .admin_commands()
                        .iter()
                        .map(|c| format!("/{}", c))
                        .collect();
                    admin_commands.sort();
                    self.reply(
                        sid,
                        &format!("Admin commands: {}", admin_commands.join(", ")),
                    )
                    .await;
                }
                let mut verbs: Vec<String> =
                    self.engine.registry.verbs().values().cloned().collect();
                verbs.sort();
                verbs.dedup();
                self.reply(sid, &format!("Verbs: {}", verbs.join(", ")))
                    .await;
                LineOutcome::Continue
            }
            "quit" => {
                self.reply(sid, "Goodbye.").await;
                LineOutcome::Disconnect
            }
            _ => {
                self.reply(sid, DEFAULT_CONFUSION).await;
                LineOutcome::Continue
            }
        }
    }

    fn who_lines(&self) -> Vec<String> {
        let mut entries = self.hub.who();
        entries.sort_by(|a, b| a.1.cmp(&b.1));
        if entries.is_empty() {
            return vec!["Nobody is connected.".to_string()];
        }
        let mut lines = vec![format!("{} connected:", entries.len())];
        for (_, name, seconds) in entries {
            lines.push(format!("  {} (on for {}s)", name, seconds));
        }
        lines
    }

    async fn embody_character(&self, sid: SessionId, name: &str) {
        let Some(account) = self.hub.account_of(sid) else {
            self.reply(sid, "Connect first.").await;
            return;
        };
        let folded = name.to_lowercase();
        let mut chosen = None;
        for id in &account.character_ids {
            if id.as_str().to_lowercase() == folded {
                chosen = Some(id.clone());
                break;
            }
            if let Ok(Some(obj)) = self.engine.cache.get(id).await {
                if obj.name.to_lowercase() == folded {
                    chosen = Some(id.clone());
                    break;
                }
            }
        }
        let Some(character) = chosen else {
            self.reply(sid, "No such character on this account.").await;
            return;
        };
        if let Err(e) = self.hub.embody(sid, character.clone()).await {
            self.reply(sid, &e.diagnostic()).await;
            return;
        }
        info!(session = %sid, character = %character, "embodied");
        self.reply(sid, &format!("You are now {}.", name)).await;
    }

    async fn dispatch_admin(&self, sid: SessionId, recognition: Recognition) -> LineOutcome {
        let result = match recognition.verb.as_str() {
            "eval" => self.admin_eval(sid, &recognition.argstr).await,
            "who" => {
                for line in self.who_lines() {
                    self.reply(sid, &line).await;
                }
                Ok(())
            }
            "create" => self.admin_create(sid, &recognition.args).await,
            "delete" => self.admin_delete(sid, &recognition.args).await,
            "reload" => self.admin_reload(sid, &recognition.args).await,
            "shutdown" => {
                let message = if recognition.argstr.is_empty() {
                    None
                } else {
                    Some(recognition.argstr.clone())
                };
                self.hub
                    .broadcast("*** The server is shutting down. ***")
                    .await;
                if let Some(m) = &message {
                    self.hub.broadcast(m).await;
                }
                self.hub.request_shutdown(message).await;
                Ok(())
            }
            "password" => self.admin_password(sid, &recognition.args).await,
            "roles" => self.admin_roles(sid, &recognition.args).await,
            _ => {
                self.reply(sid, DEFAULT_CONFUSION).await;
                Ok(())
            }
        };
        if let Err(failure) = result {
            self.reply(sid, &failure.diagnostic()).await;
        }
        LineOutcome::Continue
    }

    async fn admin_eval(&self, sid: SessionId, source: &str) -> Result<(), Failure> {
        let actor = self.hub.actor_of(sid)?;
        let roles = self.hub.roles_of(sid);
        let cancel = self.hub.cancel_flag(sid);
        let mut ctx = self
            .engine
            .context_for(actor.clone(), actor, roles, cancel)
            .await;
        match self.engine.eval_source(&mut ctx, source).await {
            Ok(value) => {
                self.reply(sid, &format!("=> {}", value.to_literal())).await;
            }
            Err(failure) => {
                self.reply(sid, &failure.diagnostic()).await;
            }
        }
        Ok(())
    }

    async fn admin_create(&self, sid: SessionId, args: &[String]) -> Result<(), Failure> {
        let Some(id) = args.first() else {
            self.reply(sid, "Usage: /create <id> [parent]").await;
            return Ok(());
        };
        let parent = args
            .get(1)
            .map(|p| ObjId::new(p.as_str()))
            .unwrap_or_else(root_object);
        let actor = self.hub.actor_of(sid)?;
        let obj = WorldObject::with_parent(ObjId::new(id.as_str()), parent).with_owner(actor);
        let created = obj.id.clone();
        self.engine.cache.create(obj).await?;
        self.reply(sid, &format!("Created {}.", created)).await;
        Ok(())
    }

    async fn admin_delete(&self, sid: SessionId, args: &[String]) -> Result<(), Failure> {
        let Some(id) = args.first() else {
            self.reply(sid, "Usage: /delete <id>").await;
            return Ok(());
        };
        let id = ObjId::new(id.as_str());
        self.engine.cache.delete(&id).await?;
        self.reply(sid, &format!("Deleted {}.", id)).await;
        Ok(())
    }

    async fn admin_reload(&self, sid: SessionId, args: &[String]) -> Result<(), Failure> {
        let (Some(path), Some(target)) = (args.first(), args.get(1)) else {
            self.reply(sid, "Usage: /reload <path> <ref> [attr]").await;
            return Ok(());
        };
        let attr = args.get(2).map(String::as_str).unwrap_or("run");
        let target = ObjId::new(target.as_str());
        self.engine.load_source(path, &target, attr).await?;
        self.reply(sid, &format!("Loaded {} into {}.{}.", path, target, attr))
            .await;
        Ok(())
    }

    async fn admin_password(&self, sid: SessionId, args: &[String]) -> Result<(), Failure> {
        let (Some(login), Some(password)) = (args.first(), args.get(1)) else {
            self.reply(sid, "Usage: /password <user> <new-password>").await;
            return Ok(());
        };
        let Some((mut account, revision)) = self
            .accounts
            .fetch_by_login(login)
            .await
            .map_err(Failure::from)?
        else {
            self.reply(sid, "No such account.").await;
            return Ok(());
        };
        account.set_password(password).map_err(|e| Failure::Protocol(e.to_string()))?;
        self.accounts
            .store(&account, Some(&revision))
            .await
            .map_err(Failure::from)?;
        self.reply(sid, &format!("Password changed for {}.", login))
            .await;
        Ok(())
    }

    async fn admin_roles(&self, sid: SessionId, args: &[String]) -> Result<(), Failure> {
        let Some(login) = args.first() else {
            self.reply(sid, "Usage: /roles <user> +role -role ...").await;
            return Ok(());
        };
        let Some((mut account, revision)) = self
            .accounts
            .fetch_by_login(login)
            .await
            .map_err(Failure::from)?
        else {
            self.reply(sid, "No such account.").await;
            return Ok(());
        };
        for change in &args[1..] {
            let (grant, name) = match change.split_at(1) {
                ("+", name) => (true, name),
                ("-", name) => (false, name),
                _ => {
                    self.reply(sid, &format!("Role changes look like +{}.", change))
                        .await;
                    return Ok(());
                }
            };
            let Ok(role) = Role::from_str(&name.to_lowercase()) else {
                self.reply(sid, &format!("Unknown role: {}", name)).await;
                return Ok(());
            };
            if grant {
                account.roles.insert(role);
            } else {
                account.roles.remove(&role);
            }
        }
        self.accounts
            .store(&account, Some(&revision))
            .await
            .map_err(Failure::from)?;
        let roles: Vec<String> = account.roles.iter().map(|r| r.to_string()).collect();
        self.reply(
            sid,
            &format!("Roles for {}: {}", login, roles.join(", ")),
        )
        .await;
        Ok(())
    }

    async fn dispatch_game(&self, sid: SessionId, recognition: Recognition) -> LineOutcome {
        let Ok(actor) = self.hub.actor_of(sid) else {
            return LineOutcome::Continue;
        };
        let transient = self.hub.transient_of(sid).ok();
        let roles = self.hub.roles_of(sid);
        let cancel = self.hub.cancel_flag(sid);
        match bind_and_run(
            &self.engine,
            &recognition,
            &actor,
            transient.as_ref(),
            roles,
            cancel,
        )
        .await
        {
            Ok(Some(bound)) => {
                if let Some(direct) = &recognition.resolved.direct {
                    self.hub.record_interaction(sid, direct.clone());
                }
                // A string return from the top level is echoed to the actor
                // as a fallback channel.
                if let Value::Str(text) = &bound.result {
                    if !text.is_empty() {
                        self.engine.sink.deliver(&actor, text).await.ok();
                    }
                }
            }
            Ok(None) => {
                self.reply(sid, DEFAULT_UNBOUND).await;
            }
            Err(failure) => {
                self.reply(sid, &failure.diagnostic()).await;
            }
        }
        LineOutcome::Continue
    }
}
